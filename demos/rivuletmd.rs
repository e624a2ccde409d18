//! Standalone media driver runner. Launches the driver, then parks the main
//! thread until Ctrl-C or a client termination command.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};

use rivulet_driver::config::ThreadingMode;
use rivulet_driver::context::DriverContext;
use rivulet_driver::driver::MediaDriver;
use rivulet_driver::error::DriverError;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = App::new("rivuletmd")
        .about("rivulet media driver")
        .arg(
            Arg::with_name("dir")
                .long("dir")
                .takes_value(true)
                .help("State directory for the CnC and log buffer files"),
        )
        .arg(
            Arg::with_name("threading-mode")
                .long("threading-mode")
                .takes_value(true)
                .possible_values(&["invoker", "shared", "shared-network", "dedicated"])
                .default_value("dedicated")
                .help("How many threads host the driver agents"),
        )
        .arg(
            Arg::with_name("delete-dir-on-start")
                .long("delete-dir-on-start")
                .help("Remove a pre-existing state directory without probing liveness"),
        )
        .get_matches();

    let threading_mode = match matches.value_of("threading-mode") {
        Some("invoker") => ThreadingMode::Invoker,
        Some("shared") => ThreadingMode::Shared,
        Some("shared-network") => ThreadingMode::SharedNetwork,
        _ => ThreadingMode::Dedicated,
    };

    let mut context = DriverContext::default()
        .set_threading_mode(threading_mode)
        .set_warn_if_directory_exists(true)
        .set_dir_delete_on_start(matches.is_present("delete-dir-on-start"));
    if let Some(dir) = matches.value_of("dir") {
        context = context.set_dir(Path::new(dir));
    }

    let mut driver = match MediaDriver::launch(context) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("{}", e);
            let code = match e {
                DriverError::ActiveDriver { .. } => 1,
                DriverError::Configuration(_) => 2,
                _ => 3,
            };
            std::process::exit(code);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    ctrlc::set_handler(move || handler_running.store(false, Ordering::SeqCst))
        .expect("unable to install Ctrl-C handler");

    println!("Press Ctrl-C to quit");

    while running.load(Ordering::SeqCst) && !driver.is_terminated() {
        match driver.invoker() {
            // Invoker mode: this thread is the driver's only duty cycle
            Some(invoker) => {
                invoker.invoke();
            }
            None => thread::sleep(Duration::from_millis(100)),
        }
    }

    driver.close();
}
