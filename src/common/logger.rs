//! `env_logger` setup shared by the binary and the test suites.
//!
//! Records are printed as `<time> <LEVEL> <module> > <message>`, with the
//! crate prefix stripped from the module path. `RUST_LOG` overrides the
//! default `info` filter.

use std::io::Write;
use std::sync::Once;

static SETUP_LOGS: Once = Once::new();

const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

/// Installs the global logger. Safe to call any number of times.
pub fn init_logger() {
    install(false);
}

/// Like [`init_logger`], but routes records through the test harness so
/// they are captured per test. Integration suites call this one, since
/// the library is not built with `cfg(test)` for them.
pub fn init_test_logger() {
    install(true);
}

fn install(is_test: bool) {
    SETUP_LOGS.call_once(|| {
        // Another logger may already be installed by an embedding program.
        let _ = build_logger().is_test(is_test).try_init();
    });
}

fn build_logger() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();

    builder.format(|f, record| {
        let target = record.target();
        let target = target
            .strip_prefix(CRATE_NAME)
            .map(|rest| rest.trim_start_matches("::"))
            .filter(|rest| !rest.is_empty())
            .unwrap_or("core");

        let time = f.timestamp_micros().to_string();
        // skip date
        let time = time.get(11..).unwrap_or(&time);
        let level = f.default_styled_level(record.level());
        writeln!(f, "{time} {level} {target} > {}", record.args())
    });

    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(log::LevelFilter::Info);
    }

    builder.parse_env("RUST_LOG");

    builder
}
