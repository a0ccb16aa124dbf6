//! Main application entry point (native).

#[cfg(feature = "native")]
fn main() {
    use clap::Parser;
    use std::sync::atomic::Ordering;

    env_logger::init();
    log::info!("Starting DrawSync");

    let cli = drawsync_app::Cli::parse();
    let result = drawsync_app::App::from_cli(&cli).and_then(|mut app| {
        let stop = app.stop_handle();
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            log::warn!("Failed to install Ctrl-C handler: {}", e);
        }
        app.run()
    });
    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "native"))]
fn main() {
    panic!("Native feature not enabled. Use `cargo run --features native`");
}
