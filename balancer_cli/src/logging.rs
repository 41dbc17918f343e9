//! Tracing setup: console layer on stderr plus an optional JSON file layer.

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::FILE_GUARD;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn rotation(name: Option<&str>) -> tracing_appender::rolling::Rotation {
    use tracing_appender::rolling::Rotation;
    match name {
        Some("daily") => Rotation::DAILY,
        Some("hourly") => Rotation::HOURLY,
        _ => Rotation::NEVER,
    }
}

fn file_layer(l: &balancer_config::Logging) -> Option<BoxedLayer> {
    let path = Path::new(l.file.as_deref()?);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path.file_name()?;
    let appender = tracing_appender::rolling::RollingFileAppender::new(
        rotation(l.rotation.as_deref()),
        dir,
        name,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    let level = l.level.as_deref().unwrap_or("info");
    Some(
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(EnvFilter::new(level))
            .boxed(),
    )
}

/// Install the global subscriber. `RUST_LOG` wins over `console_level`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(json: bool, console_level: &str, logging: Option<&balancer_config::Logging>) {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_level));

    let console: BoxedLayer = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let mut layers = vec![console];
    if let Some(f) = logging.and_then(file_layer) {
        layers.push(f);
    }
    let _ = tracing_subscriber::registry().with(layers).try_init();
}
