//! Simple re-export of logging-related macros, plus the shared subscriber and
//! error-report setup used by the binaries.
pub use color_eyre::eyre::eyre;
pub use tracing::{debug, error, info, span, trace, warn};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Install color_eyre as the global error handler.
#[tracing::instrument]
pub fn install_color_eyre() -> color_eyre::eyre::Result<()> {
    color_eyre::config::HookBuilder::default()
        .issue_url(concat!(env!("CARGO_PKG_REPOSITORY"), "/issues/new"))
        .add_default_filters()
        .add_frame_filter(Box::new(|frames| {
            let filters = &[
                "tokio::",
                "tracing::",
                "color_eyre::",
                "reqwest::",
                "hyper::",
                "<core::",
            ];

            frames.retain(|frame| {
                !filters.iter().any(|f| {
                    let name = if let Some(name) = frame.name.as_ref() {
                        name.as_str()
                    } else {
                        return true;
                    };

                    name.starts_with(f)
                })
            });
        }))
        .install()?;

    Ok(())
}

/// Map the `-q` flag and `-v` count onto a level filter. `-v` always wins
/// over `-q`.
pub fn level_filter(quiet: bool, verbose: usize) -> LevelFilter {
    if quiet && verbose == 0 {
        LevelFilter::ERROR
    } else if verbose > 0 {
        match verbose {
            1 => LevelFilter::WARN,
            2 => LevelFilter::INFO,
            3 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    } else {
        LevelFilter::ERROR
    }
}

/// Install the global tracing subscriber: compact output with a UTC
/// timestamp, written to stderr so it never interleaves with rendered job
/// output on stdout.
pub fn init_subscriber(quiet: bool, verbose: usize) {
    let logging_config = tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::new(
            time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ))
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .compact()
        .with_max_level(level_filter(quiet, verbose));

    let subscriber = logging_config.finish();
    subscriber.init();
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::level_filter;

    #[test]
    fn test_verbose_overrides_quiet() {
        assert_eq!(LevelFilter::ERROR, level_filter(true, 0));
        assert_eq!(LevelFilter::ERROR, level_filter(false, 0));
        assert_eq!(LevelFilter::WARN, level_filter(true, 1));
        assert_eq!(LevelFilter::DEBUG, level_filter(false, 3));
        assert_eq!(LevelFilter::TRACE, level_filter(false, 7));
    }
}
