use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use sharego_core::config::DEFAULT_PORT;
use sharego_core::controller::SessionController;
use sharego_core::discovery::{discover_receiver, DiscoverOptions};
use sharego_core::{
    advertise_receiver, QrPayload, SessionConfig, SessionId, SessionState, SessionSnapshot,
};
use sharego_net::{MdnsDiscovery, SystemIpResolver, TcpFrameClient, TcpFrameServer};

#[derive(Parser, Debug)]
#[command(name = "sharego", version, about = "ShareGo - share secrets over the LAN")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Device name shown to the peer (defaults to the host name)
    #[arg(long, global = true)]
    name: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait for a sender: show the QR payload and session code, approve the
    /// pairing, print received secrets
    Receive {
        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Approve the first pairing request without asking
        #[arg(long)]
        auto_approve: bool,

        /// Skip mDNS advertising
        #[arg(long)]
        no_mdns: bool,
    },

    /// Pair with a receiver and send one secret
    Send {
        /// The secret text to send
        #[arg(long)]
        text: String,

        /// Full QR payload JSON (pastes the scanned QR)
        #[arg(long)]
        qr: Option<String>,

        /// Session code shown under the receiver's QR
        #[arg(long)]
        code: Option<String>,

        /// Receiver address (ip:port); skips discovery
        #[arg(long)]
        addr: Option<String>,

        /// Port used during discovery
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    let device_name = cli.name.clone().unwrap_or_else(default_device_name);

    match cli.cmd {
        Commands::Receive { port, auto_approve, no_mdns } => {
            receive(device_name, port, auto_approve, no_mdns).await
        }
        Commands::Send { text, qr, code, addr, port } => {
            send(device_name, text, qr, code, addr, port).await
        }
    }
}

fn default_device_name() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "ShareGo".to_string())
}

async fn receive(device_name: String, port: u16, auto_approve: bool, no_mdns: bool) -> Result<()> {
    let controller = SessionController::new();
    let mut snapshots = controller.subscribe();

    let config = SessionConfig::default().with_device_name(device_name.as_str()).with_port(port);
    let server = TcpFrameServer::new(Arc::new(SystemIpResolver));
    controller.start_receiver(Box::new(server), config).await?;

    let snapshot = controller.snapshot();
    let qr_json = snapshot.qr_payload.clone().context("no QR payload published")?;
    let payload = QrPayload::decode(&qr_json)?;

    println!("✓ Listening on {}", payload.addr);
    println!("  Session code: {}", payload.sid);
    println!("  QR payload: {}", qr_json);
    println!("  Waiting for a sender... (Ctrl+C to stop)");

    // Best effort; a receiver without mDNS is still reachable by QR or
    // subnet probe.
    let mut mdns = None;
    if !no_mdns {
        match MdnsDiscovery::new(device_name.as_str()) {
            Err(err) => tracing::warn!("mDNS unavailable: {err}"),
            Ok(adapter) => {
                if let Err(err) =
                    advertise_receiver(&adapter, payload.addr.port(), &payload.sid, &payload.pk)
                        .await
                {
                    tracing::warn!("mDNS advertising failed: {err}");
                } else {
                    mdns = Some(adapter);
                }
            }
        }
    }

    let mut printed_items = 0;
    let mut prompted = false;
    loop {
        let snapshot = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.end_session();
                println!("\n✓ Session ended");
                break;
            }
            snapshot = snapshots.recv() => match snapshot {
                Some(snapshot) => snapshot,
                None => break,
            },
        };

        print_new_items(&snapshot, &mut printed_items);

        if let Some(request) = &snapshot.pairing_request {
            if auto_approve {
                println!("← Pairing request from {} (auto-approved)", request.device_name);
                controller.approve()?;
            } else if !prompted {
                prompted = true;
                let accept =
                    prompt_yes_no(&format!("← Pairing request from {}. Accept?", request.device_name))
                        .await?;
                if accept {
                    controller.approve()?;
                    println!("✓ Paired");
                } else {
                    controller.reject(Some("not allowed"))?;
                    println!("✗ Rejected");
                }
            }
        }

        if let Some(error) = &snapshot.error {
            eprintln!("✗ {error}");
        }
        if snapshot.state == SessionState::Closed {
            break;
        }
    }

    if let Some(adapter) = mdns {
        use sharego_core::DiscoveryAdapter;
        adapter.stop_advertising().await;
    }
    Ok(())
}

fn print_new_items(snapshot: &SessionSnapshot, printed: &mut usize) {
    for item in snapshot.received_items.iter().skip(*printed) {
        println!("← Received: {}", item.text);
    }
    *printed = snapshot.received_items.len();
}

async fn send(
    device_name: String,
    text: String,
    qr: Option<String>,
    code: Option<String>,
    addr: Option<String>,
    port: u16,
) -> Result<()> {
    let (target, session_id, receiver_pk) = match (qr, code) {
        (Some(qr_json), _) => {
            let payload = QrPayload::decode(&qr_json).context("invalid QR payload")?;
            (payload.addr.to_string(), payload.sid, Some(payload.pk))
        }
        (None, Some(code)) => {
            let session_id = SessionId::parse(&code)?;
            match addr {
                Some(addr) => (addr, session_id, None),
                None => {
                    println!("Looking for receiver {session_id}...");
                    let adapter = MdnsDiscovery::new(device_name.as_str()).ok();
                    let opts = DiscoverOptions::new(session_id.clone(), port);
                    let found = discover_receiver(
                        adapter.as_ref().map(|a| a as &dyn sharego_core::DiscoveryAdapter),
                        Arc::new(TcpFrameClient),
                        &SystemIpResolver,
                        &opts,
                    )
                    .await
                    .context("receiver not found on this network")?;
                    println!("✓ Found receiver at {}", found.address);
                    (found.address.to_string(), session_id, found.public_key)
                }
            }
        }
        (None, None) => bail!("provide --qr or --code"),
    };

    let controller = SessionController::new();
    let mut snapshots = controller.subscribe();

    let config = SessionConfig::default().with_device_name(device_name.as_str());
    controller
        .start_sender(
            Box::new(TcpFrameClient),
            config,
            &target,
            session_id,
            receiver_pk,
        )
        .await?;
    println!("✓ Connected to {target}; waiting for approval...");

    let mut sent = false;
    loop {
        let Some(snapshot) = snapshots.recv().await else { break };

        if snapshot.state == SessionState::Active && !sent {
            sent = true;
            controller.send_data(&text)?;
            println!("→ Secret sent; waiting for acknowledgement...");
        }
        if sent && snapshot.sent_items.iter().any(|item| item.acked) {
            println!("✓ Delivered");
            controller.end_session();
            break;
        }
        if let Some(error) = &snapshot.error {
            bail!("{error}");
        }
        if snapshot.state == SessionState::Closed {
            bail!("session closed before delivery");
        }
    }
    Ok(())
}

async fn prompt_yes_no(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    use std::io::Write;
    std::io::stdout().flush()?;
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
