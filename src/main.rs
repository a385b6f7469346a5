//! Kinetica CLI - sensor protocol collector and packet tools.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tokio::time::timeout;

use kinetica::cli::*;
use kinetica::config::{init_logging, Config, LoggingConfig};
use kinetica::error::{Error, Result};
use kinetica::protocol::relay::DEFAULT_MAX_RELAY_DEPTH;
use kinetica::protocol::{
    decode_packet, encode_packet, unwrap_relayed, Capabilities, DataType, DeviceStatus,
    DeviceType, Message, Packet, Reading, Registration, RelayedMessage, SensorData,
    SensorDataMulti, SensorHeartbeat, TransportCrc,
};
use kinetica::server::Collector;
use kinetica::transport::{Connection, Medium, TcpTransport, UdpConnection};
use kinetica::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config if specified
    let config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    let log_config = LoggingConfig {
        level: cli.log_level.clone(),
        color: config.logging.color && !cli.no_color,
        ..config.logging.clone()
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Listen(args) => run_listen(args, config).await,
        Commands::Send(args) => run_send(args, config).await,
        Commands::Encode(args) => run_encode(args),
        Commands::Decode(args) => run_decode(args),
        Commands::Config(args) => run_config(args),
    }
}

/// Run a collector until Ctrl-C.
async fn run_listen(args: ListenArgs, mut config: Config) -> Result<()> {
    if let Some(addr) = args.addr {
        config.collector.listen = addr;
    }
    if let Some(medium) = args.medium {
        config.collector.medium = medium;
    }
    if args.crc.is_some() {
        config.transport.crc = args.crc;
    }
    if args.no_ack {
        config.collector.ack_registrations = false;
    }
    if args.reassemble {
        config.collector.reassemble_fragments = true;
    }
    config.validate()?;

    let medium = config.collector.medium;
    let collector = Collector::bind(config.collector, &config.transport)?;
    let shutdown = collector.shutdown_handle();

    println!("{} {}", "KINETICA COLLECTOR".bright_cyan().bold(), VERSION);
    println!(
        "  {} {} ({}, footer {})",
        "→".cyan(),
        collector.local_addr(),
        medium,
        config.transport.effective_crc(medium)
    );
    println!();

    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        shutdown.shutdown();
    });

    let (mut rx, handle) = collector.spawn();
    while let Some(inbound) = rx.recv().await {
        let via = if inbound.is_relayed() {
            format!(" via relays {:?}", inbound.relay_path)
        } else {
            String::new()
        };
        println!(
            "{} {}{}",
            inbound.peer.to_string().dimmed(),
            format!("#{}", inbound.packet.packet_id()).yellow(),
            via.magenta()
        );
        print_message(&inbound.packet.message);
    }

    handle
        .await
        .map_err(|e| Error::Internal(format!("collector task failed: {e}")))??;

    println!("{} Collector stopped", "✓".green());
    Ok(())
}

/// Send one demo message, optionally waiting for an acknowledgment.
async fn run_send(args: SendArgs, mut config: Config) -> Result<()> {
    if args.crc.is_some() {
        config.transport.crc = args.crc;
    }

    let conn: Box<dyn Connection> = match args.medium {
        Medium::Tcp => Box::new(TcpTransport::connect(args.addr, &config.transport).await?),
        Medium::Udp => Box::new(UdpConnection::connect(args.addr, &config.transport).await?),
        other => {
            return Err(Error::InvalidConfig(format!(
                "cannot send over {other} from the command line"
            )))
        }
    };

    let message = demo_message(args.kind, args.sensor_id)?;
    let packet_id = conn.send(&message).await?;
    println!(
        "{} Sent {} as packet #{} to {} ({})",
        "✓".green(),
        message.message_type().to_string().bright_white(),
        packet_id,
        args.addr,
        conn.transport_type()
    );

    if let Some(wait) = args.wait_ack {
        match timeout(wait, conn.recv()).await {
            Ok(Ok(packet)) => {
                println!("{} Reply packet #{}", "←".cyan(), packet.packet_id());
                print_message(&packet.message);
            }
            Ok(Err(e)) => println!("{} {}", "✗".red(), e),
            Err(_) => println!("{} No reply within {:?}", "⚠".yellow(), wait),
        }
    }

    conn.close().await
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let message = demo_message(args.kind, args.sensor_id)?;
    let bytes = encode_packet(args.packet_id, &message, args.crc)?;

    println!("{}", hex::encode(&bytes));
    eprintln!(
        "{} {} bytes, footer {}",
        message.message_type().to_string().dimmed(),
        bytes.len(),
        args.crc
    );
    Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let cleaned: String = args.hex.split_whitespace().collect();
    let bytes = hex::decode(&cleaned).map_err(|e| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid hex: {e}"),
        ))
    })?;

    let packet = decode_packet(&bytes, args.crc)?;
    print_packet(&packet);

    if matches!(packet.message, Message::Relayed(_)) {
        let (origin, path) = unwrap_relayed(packet, args.relay_crc, DEFAULT_MAX_RELAY_DEPTH)?;
        println!();
        println!("{} {:?}", "Relay path:".bright_white(), path);
        print_packet(&origin);
    }

    Ok(())
}

fn run_config(args: ConfigArgs) -> Result<()> {
    let output = toml::to_string_pretty(&Config::example())
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{}", output);
    }

    Ok(())
}

fn print_packet(packet: &Packet) {
    println!("{}", "Header:".bright_white());
    println!("  packet id  {}", packet.header.packet_id);
    println!("  version    {}", packet.header.version);
    println!("  type       {}", packet.message_type());
    println!("  length     {}", packet.header.length);
    println!("{}", "Message:".bright_white());
    print_message(&packet.message);
}

fn print_message(message: &Message) {
    for line in format!("{message:#?}").lines() {
        println!("  {line}");
    }
}

/// Build a demo message of the requested kind.
///
/// Relayed packets carry an inner packet without a footer, whatever the
/// link uses.
fn demo_message(kind: DemoMessage, sensor_id: u8) -> Result<Message> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let timestamp = u32::try_from(timestamp).unwrap_or(u32::MAX);

    let heartbeat = SensorHeartbeat {
        sensor_id,
        timestamp,
        battery: 85,
        status: DeviceStatus::OK,
    };

    let message = match kind {
        DemoMessage::Heartbeat => heartbeat.into(),
        DemoMessage::Data => SensorData {
            sensor_id,
            timestamp,
            reading: Reading::new(DataType::ACCELEROMETER, [0.12, -0.03, 9.81]),
        }
        .into(),
        DemoMessage::Register => Registration {
            sensor_id,
            device_type: DeviceType::SIX_AXIS,
            capabilities: Capabilities::new(Capabilities::ACCELEROMETER | Capabilities::GYROSCOPE),
            fw_version: 0x0102,
        }
        .into(),
        DemoMessage::Multi => SensorDataMulti {
            sensor_id,
            timestamp,
            readings: vec![
                Reading::new(DataType::ACCELEROMETER, [0.12, -0.03, 9.81]),
                Reading::new(DataType::GYROSCOPE, [0.01, 0.02, -0.01]),
            ],
        }
        .into(),
        DemoMessage::Relay => {
            let inner = encode_packet(0, &heartbeat.into(), TransportCrc::None)?;
            RelayedMessage::wrap(sensor_id.wrapping_add(100), inner).into()
        }
    };

    Ok(message)
}
