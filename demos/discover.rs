use pixelair::logging;
use pixelair::runtime::{ClientConfig, PixelAirRuntime};
use pixelair::{JsonStateDecoder, SystemArpTable};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn main() {
    logging::init_from_env();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => match ClientConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => ClientConfig::default(),
    };
    let full_info = args.iter().any(|a| a == "--info");

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        log::info!("Shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    let interval = config.scan_timeout() + Duration::from_secs(1);
    let client = PixelAirRuntime::with_decoder(config, Arc::new(SystemArpTable), Arc::new(JsonStateDecoder));
    if let Err(e) = client.start() {
        log::error!("Failed to start transport: {}", e);
        std::process::exit(1);
    }

    rt.block_on(async {
        let discovery = client.discovery().continuous(interval, full_info, |device| {
            println!(
                "{:<16} {:<15} counter={:<6} mac={} model={} name={}",
                device.serial_number,
                device.ip_address,
                device.state_counter,
                device.mac_address.map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
                device.model.as_deref().unwrap_or("-"),
                device.nickname.as_deref().unwrap_or("-"),
            );
        });
        let discovery = match discovery {
            Ok(d) => d,
            Err(e) => {
                log::error!("{}", e);
                return;
            }
        };

        while running.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        discovery.stop().await;
    });

    client.stop();
}
