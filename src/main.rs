use afv_client::afv_client::ClientEvent;
use afv_client::audio::sample_provider::soundcard_provider_factory;
use afv_client::audio::{AlsaBackend, AudioBackend, NoPermissionModel};
use afv_client::connection::OfflineConnection;
use afv_client::{AfvClient, AfvClientBridge, ClientCommand, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load()?;
    let backend = Arc::new(AlsaBackend::new());

    if std::env::args().any(|arg| arg == "--list-devices") {
        for device in backend.devices() {
            println!(
                "{:?}\t{}{}\t{}",
                device.direction,
                device.name,
                if device.is_default { " (default)" } else { "" },
                device.id
            );
        }
        return Ok(());
    }
    let dump_snapshots = std::env::args().any(|arg| arg == "--json");

    // client notifications
    let (tx_client_event, mut rx_client_event) = mpsc::channel::<ClientEvent>(100);
    // received voice, stays empty while offline
    let (_tx_inbound_audio, rx_inbound_audio) = mpsc::channel(100);

    let api_url = Url::parse(&config.api_url)?;
    let input_device = config.input_device.clone();
    let output_device = config.output_device.clone();

    let (client, audio_events) = AfvClient::new(
        config,
        Box::new(OfflineConnection::new(api_url)),
        backend,
        soundcard_provider_factory(),
        Arc::new(NoPermissionModel),
        tx_client_event,
    );
    let (bridge, worker) = AfvClientBridge::spawn(client, audio_events, rx_inbound_audio);

    bridge.send(ClientCommand::SetLoopback(true)).await?;
    bridge.start(&input_device, &output_device).await?;
    println!("Mic test running. Type 'p' + Enter to toggle PTT, 'q' to quit.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut vu_timer = tokio::time::interval(Duration::from_secs(1));
    let mut ptt = false;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            line = stdin.next_line() => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "p" => {
                            ptt = !ptt;
                            bridge.set_ptt(ptt).await?;
                        }
                        "q" => break,
                        "" => {}
                        other => println!("Unknown command: {}", other),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }

            Some(event) = rx_client_event.recv() => {
                match event {
                    ClientEvent::Started { input, output } => {
                        println!("Audio started [Input: {}] [Output: {}]", input, output);
                    }
                    ClientEvent::Stopped => println!("Audio stopped"),
                    ClientEvent::Ptt(active) => println!("PTT {}", if active { "ON" } else { "OFF" }),
                    ClientEvent::ReceivingCallsignsChanged(args) => {
                        log::info!("COM{} receiving: {:?}", args.transceiver_id + 1, args.callsigns);
                    }
                    ClientEvent::ConnectionStatusChanged(status) => log::info!("Connection: {:?}", status),
                    // peaks are polled from the snapshot
                    _ => {}
                }
            }

            _ = vu_timer.tick() => {
                let snapshot = bridge.snapshot();
                if !snapshot.is_started {
                    continue;
                }
                log::info!(
                    "VU in {:.2} out {:.2}",
                    snapshot.input_peak_vu,
                    snapshot.output_peak_vu
                );
                if dump_snapshots {
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => println!("{}", json),
                        Err(e) => log::warn!("Failed to serialize snapshot: {}", e),
                    }
                }
            }
        }
    }

    bridge.shutdown(worker).await?;
    Ok(())
}
