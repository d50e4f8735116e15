mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use intercom_dialog_core::{default_audio_section, default_video_section, ContactId, UserAgent};
use intercom_infra_common::{log_welcome, setup_logging};
use intercom_rtp_core::PortReserver;
use intercom_session_core::{CallSession, SessionEvent};
use tracing::{info, warn};

use crate::config::DeviceFile;

/// Register with an intercom device and hold a call open until Ctrl-C
#[derive(Parser, Debug)]
#[command(name = "intercom-call", version, about)]
struct Cli {
    /// Device configuration with [sip], [session] and [logging] tables
    #[arg(short, long, env = "INTERCOM_CONFIG")]
    config: PathBuf,

    /// REGISTER before calling
    #[arg(long)]
    register: bool,

    /// Send a MESSAGE with this body before calling
    #[arg(long)]
    message: Option<String>,

    /// Only register and send the message; do not call
    #[arg(long)]
    no_call: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = DeviceFile::load(&cli.config)?;

    setup_logging(&file.logging)?;
    log_welcome(&file.logging.app_name, env!("CARGO_PKG_VERSION"));

    let agent = UserAgent::new(file.sip.clone(), ContactId::generate())
        .await
        .context("starting SIP user agent")?;
    info!("SIP agent on {} talking to {}", agent.local_addr(), agent.remote_addr());

    let result = run(&cli, &file, &agent).await;
    agent.destroy().await;
    result
}

async fn run(cli: &Cli, file: &DeviceFile, agent: &UserAgent) -> anyhow::Result<()> {
    if cli.register {
        agent.register().await.context("REGISTER failed")?;
        info!("Registered for {} seconds", file.sip.lease());
    }

    if let Some(text) = &cli.message {
        let response = agent.message(text.as_str()).await.context("MESSAGE failed")?;
        info!("Device answered MESSAGE with {}", response.status);
    }

    if cli.no_call {
        return Ok(());
    }

    let reserver = Arc::new(PortReserver::new());
    let session = CallSession::with_reserver(agent.clone(), file.session.clone(), reserver).await?;
    let mut events = session.subscribe()?;

    let remote = session
        .call(&default_audio_section, &default_video_section)
        .await
        .context("call failed")?;
    info!(
        "Call connected: audio port {}, video port {}, NAT strategy {:?}",
        remote.audio.port,
        remote.video.port,
        session.nat_strategy()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, hanging up");
                break;
            }
            event = events.receive() => match event {
                Ok(SessionEvent::CallEnded { reason }) => {
                    info!("Call ended: {}", reason);
                    break;
                }
                Ok(SessionEvent::RtpPacket { media, packet }) => {
                    tracing::trace!("{} RTP packet, {} bytes", media, packet.len());
                }
                Ok(SessionEvent::RtcpPacket { media, packet }) => {
                    tracing::debug!("{} RTCP packet, {} bytes", media, packet.len());
                }
                Ok(event) => info!("{:?}", event),
                Err(e) => {
                    warn!("Event stream closed: {}", e);
                    break;
                }
            }
        }
    }

    session.stop().await;
    let health = session.health();
    info!(
        "Audio: {} packets, {} lost; video: {} packets, {} lost",
        health.audio.packets, health.audio.lost, health.video.packets, health.video.lost
    );
    Ok(())
}
