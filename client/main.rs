// obex-tcp: send a file to an OBEX peer over TCP, or receive one
use clap::Parser;
use obex::{
    from_fn, Event, EventKind, HeaderId, InitFlags, Object, Opcode, ResponseCode, Session,
    SessionConfig, TcpTransport, OBEX_PORT,
};
use obex_client::sync_request;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "obex-tcp")]
#[command(about = "OBEX over TCP: PUT a file to a peer, or wait for one", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// File to send; without it the tool waits for one incoming PUT
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Peer address (client) or bind address (server)
    #[arg(value_name = "ADDR", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    addr: IpAddr,

    #[arg(short, long, default_value_t = OBEX_PORT)]
    port: u16,

    /// Seconds to wait for each response
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let addr = SocketAddr::new(cli.addr, cli.port);
    let result = match &cli.file {
        Some(path) => send(addr, path, Duration::from_secs(cli.timeout)),
        None => receive(addr),
    };
    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

fn send(addr: SocketAddr, path: &Path, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let body = fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let handler = from_fn(|_: &mut Session, event: Event<'_>| {
        if event.kind == EventKind::Progress {
            if let Some(obj) = event.object {
                info!("{} bytes sent", obj.tx_body_sent());
            }
        }
    });
    let mut session = Session::client(TcpTransport::client(addr), SessionConfig::from_env(), handler);
    session.transport_connect()?;

    let steps = [Object::connect(), Object::put(&name, body), Object::disconnect()];
    for object in steps {
        let cmd = object.cmd();
        match sync_request(&mut session, object, timeout)? {
            Some(rsp) if rsp.is_success() => info!("{}: {}", cmd, rsp),
            Some(rsp) => return Err(format!("{} refused: {}", cmd, rsp).into()),
            None => return Err(format!("{} got no response", cmd).into()),
        }
    }
    session.transport_disconnect()?;
    Ok(())
}

// Answers CONNECT, PUT and DISCONNECT with SUCCESS and writes the first PUT
// into the current directory.
fn receive(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let handler = from_fn(|session: &mut Session, event: Event<'_>| {
        let Some(obj) = event.object else {
            return;
        };
        match (event.kind, obj.cmd()) {
            (EventKind::Request, Opcode::CONNECT | Opcode::DISCONNECT) => {
                obj.set_response(ResponseCode::CONTINUE, ResponseCode::SUCCESS);
            }
            (EventKind::Request, Opcode::PUT) => {
                let name = obj
                    .header(HeaderId::NAME)
                    .and_then(|h| h.as_str())
                    .and_then(|n| Path::new(n).file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "received.bin".to_string());
                match fs::write(&name, obj.body()) {
                    Ok(()) => {
                        info!("stored {} bytes in {}", obj.body().len(), name);
                        obj.set_response(ResponseCode::CONTINUE, ResponseCode::SUCCESS);
                        session.set_user_data(name);
                    }
                    Err(e) => {
                        error!("can't store {}: {}", name, e);
                        obj.set_response(ResponseCode::CONTINUE, ResponseCode::INTERNAL_SERVER_ERROR);
                    }
                }
            }
            _ => {}
        }
    });

    let config = SessionConfig::from_env();
    let mut flags = config.flags;
    flags.insert(InitFlags::KEEP_SERVER);
    let mut session = Session::server(TcpTransport::server(addr), config.with_flags(flags), handler);
    session.server_register()?;
    info!("waiting for a PUT on {}", addr);

    // The listener stays open across peers; stop once a file arrived and
    // that peer hung up.
    loop {
        match session.handle_input(None) {
            Ok(_) => {}
            Err(e) if e.usage().is_some() => return Err(e.into()),
            Err(e) => {
                info!("peer gone: {}", e);
                if session.user_data::<String>().is_some() {
                    break;
                }
            }
        }
    }
    session.transport_disconnect()?;
    Ok(())
}
