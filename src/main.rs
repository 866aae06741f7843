use clap::Parser;
use replset::{Document, HostAndPort, NodeTransport, ReplSetNodeConfig, ReplicationOptions, Value};
use slog::Drain;
use std::error::Error;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

/// Runs one member of a replica set, served over gRPC on localhost.
#[derive(Debug, Parser)]
#[command(name = "replset")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to serve peers on
    #[arg(long)]
    port: u16,

    /// Name of the replica set
    #[arg(long = "set")]
    set_name: String,

    /// Another member of the set, as host:port. Repeat for each member
    #[arg(long = "member")]
    members: Vec<HostAndPort>,

    /// Directory for rollback save files
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Install the initial config built from --member
    #[arg(long)]
    initiate: bool,
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

/// Members get ids in the order they were given. This node is always part of the set.
fn initial_config(set_name: &str, self_host: &HostAndPort, members: &[HostAndPort]) -> Document {
    let mut hosts = vec![self_host.clone()];
    hosts.extend(members.iter().filter(|m| *m != self_host).cloned());

    let members = hosts
        .iter()
        .enumerate()
        .map(|(id, host)| {
            Value::from(
                Document::new()
                    .with("_id", id as i64)
                    .with("host", host.to_string()),
            )
        })
        .collect::<Vec<_>>();

    Document::new()
        .with("_id", set_name)
        .with("version", 1i64)
        .with("protocolVersion", 1i64)
        .with("members", members)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let logger = create_root_logger();

    let self_host = HostAndPort::new("localhost", args.port);
    let listen_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, args.port));

    let node = replset::try_create_node(ReplSetNodeConfig {
        self_host: self_host.clone(),
        set_name: Some(args.set_name.clone()),
        transport: NodeTransport::Grpc { listen_addr },
        info_logger: logger.clone(),
        options: ReplicationOptions {
            db_path: args.db_path,
            ..Default::default()
        },
    })
    .await?;

    if args.initiate {
        node.initiate(initial_config(&args.set_name, &self_host, &args.members))
            .await?;
        slog::info!(logger, "Initiated set '{}'", args.set_name);
    }

    let mut events = node.event_listener().await;
    loop {
        tokio::select! {
            event = events.next_event() => match event {
                Some(event) => slog::info!(logger, "{:?}", event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_repeat_and_parse_as_hosts() {
        let args = Args::try_parse_from([
            "replset", "--port", "27017", "--set", "rs0", "--member", "a:1", "--member", "b:2", "--initiate",
        ])
        .unwrap();

        assert_eq!(args.port, 27017);
        assert_eq!(args.set_name, "rs0");
        assert_eq!(args.members, vec![HostAndPort::new("a", 1), HostAndPort::new("b", 2)]);
        assert!(args.initiate);
        assert_eq!(args.db_path, None);
    }

    #[test]
    fn rejects_a_member_without_a_port() {
        let result = Args::try_parse_from(["replset", "--port", "1", "--set", "rs0", "--member", "a"]);

        assert!(result.is_err());
    }

    #[test]
    fn port_and_set_are_required() {
        assert!(Args::try_parse_from(["replset", "--set", "rs0"]).is_err());
        assert!(Args::try_parse_from(["replset", "--port", "1"]).is_err());
    }

    #[test]
    fn initial_config_puts_this_node_first() {
        let me = HostAndPort::new("localhost", 1);
        let config = initial_config("rs0", &me, &[HostAndPort::new("b", 2), me.clone()]);

        let members = config.get_array("members").unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].as_document().unwrap().get_str("host"), Some("localhost:1"));
    }
}
