/* Logger initialization */
use std::{panic, thread};

use tracing::{error, level_filters::LevelFilter};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use crate::CargoEnv;

pub struct LoggerGuards {
    pub _tracing_guard: WorkerGuard,
    // option because it can be loaded without this if wanted
    pub _sentry_guard: Option<sentry::ClientInitGuard>,
}

pub struct Logger {}

impl Logger {
    pub fn init(cargo_env: CargoEnv, sentry_dsn: Option<String>) -> LoggerGuards {
        let (non_blocking, guard) = Self::writer(cargo_env);

        let sentry_guard = sentry_dsn.map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(Self::environment_name(cargo_env).into()),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(non_blocking);

        let registry = tracing_subscriber::registry()
            .with(Self::max_level(cargo_env))
            .with(fmt_layer);

        if sentry_guard.is_some() {
            registry.with(sentry_tracing::layer()).init();
        } else {
            registry.init();
        }

        Self::install_panic_hook();

        // return both guards so they're not dropped
        LoggerGuards {
            _tracing_guard: guard,
            _sentry_guard: sentry_guard,
        }
    }

    // resolution chains are noisy at debug, so production only gets it in the rolling file
    fn max_level(cargo_env: CargoEnv) -> LevelFilter {
        match cargo_env {
            CargoEnv::Development => LevelFilter::INFO,
            CargoEnv::Production => LevelFilter::DEBUG,
        }
    }

    fn writer(cargo_env: CargoEnv) -> (NonBlocking, WorkerGuard) {
        match cargo_env {
            CargoEnv::Development => tracing_appender::non_blocking(std::io::stdout()),
            CargoEnv::Production => {
                tracing_appender::non_blocking(tracing_appender::rolling::daily(
                    "logs",
                    "resolver.log",
                ))
            }
        }
    }

    fn environment_name(cargo_env: CargoEnv) -> &'static str {
        match cargo_env {
            CargoEnv::Development => "development",
            CargoEnv::Production => "production",
        }
    }

    fn install_panic_hook() {
        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let thread = thread.name().unwrap_or("unknown");

            let msg = match info.payload().downcast_ref::<&'static str>() {
                Some(s) => *s,
                None => match info.payload().downcast_ref::<String>() {
                    Some(s) => &**s,
                    None => "Box<Any>",
                },
            };

            // a worker dying mid session is the only place these show up, the trace is what
            // tells you which stage it was on
            let backtrace = backtrace::Backtrace::new();
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown location".to_string());

            match msg.strip_prefix("notrace - ") {
                Some(short) => error!(
                    target: "panic", "thread '{}' panicked at '{}': {}",
                    thread, short, location
                ),
                None => error!(
                    target: "panic", "thread '{}' panicked at '{}': {}\n{:?}",
                    thread, msg, location, backtrace
                ),
            }
        }));
    }
}
