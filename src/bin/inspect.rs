//! netrep inspect
//!
//! Opens a section on a running server and prints the tree the server holds
//! for it. Optionally creates one child under the section first.
//!
//! Usage:
//!   netrep-inspect --types world::Section,world::Prop --section-type world::Section \
//!       --fingerprint 6c6f6262 --child-type world::Prop --child-payload 0102

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use netrep::net::client::ReplicaConnection;
use netrep::replication::registry::EntityRegistry;
use netrep::{ClientConfig, EntityKey, RawReplica, TypeRegistry};

#[derive(Parser, Debug)]
#[command(name = "netrep-inspect", about = "Inspect a section on a netrep server", version)]
struct Args {
    /// Server host
    #[arg(long, env = "NETREP_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server replication port
    #[arg(long, env = "NETREP_PORT", default_value_t = 43600)]
    port: u16,

    /// Replicated type names, in the server's order
    #[arg(long, env = "NETREP_REPLICATED_TYPES", value_delimiter = ',', required = true)]
    types: Vec<String>,

    /// Type of the section to open
    #[arg(long)]
    section_type: String,

    /// Section fingerprint, hex encoded
    #[arg(long)]
    fingerprint: String,

    /// Create one child of this type once the section is registered
    #[arg(long)]
    child_type: Option<String>,

    /// Child payload, hex encoded
    #[arg(long, default_value = "")]
    child_payload: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let types = Arc::new(TypeRegistry::from_names(args.types.iter().cloned())?);
    let fingerprint = parse_hex(&args.fingerprint).context("Invalid --fingerprint")?;
    let child_payload = parse_hex(&args.child_payload).context("Invalid --child-payload")?;

    let config = ClientConfig {
        host: args.host.clone(),
        port: args.port,
        ..ClientConfig::default()
    };
    let mut connection = ReplicaConnection::connect(&config, types).await?;

    let section = connection
        .client_mut()
        .create_section(Box::new(RawReplica::section(&args.section_type, fingerprint)))?;
    connection
        .recv_until(|client| is_registered(client.entities(), section))
        .await?;

    if let Some(child_type) = &args.child_type {
        let child = connection.client_mut().create_child(
            section,
            Box::new(RawReplica::new(child_type.as_str()).with_payload(child_payload)),
        )?;
        connection
            .recv_until(|client| is_registered(client.entities(), child))
            .await?;
    }

    for event in connection.client_mut().drain_events() {
        info!("{:?}", event);
    }

    let client = connection.client();
    print_tree(client.entities(), client.types(), section, 0)?;

    connection.shutdown().await?;
    Ok(())
}

fn is_registered(entities: &EntityRegistry, key: EntityKey) -> bool {
    entities
        .state(key)
        .map(|state| state.is_registered())
        .unwrap_or(false)
}

fn print_tree(
    entities: &EntityRegistry,
    types: &TypeRegistry,
    key: EntityKey,
    depth: usize,
) -> Result<()> {
    let id = entities.id_of(key)?;
    let type_id = entities.type_id_of(key)?;
    let type_name = types.type_name(type_id).unwrap_or("?");
    let payload_len = entities
        .replica(key)?
        .serialize()
        .map(|p| p.len())
        .unwrap_or(0);

    println!(
        "{:indent$}{} {} ({} bytes)",
        "",
        id,
        type_name,
        payload_len,
        indent = depth * 2
    );

    for child in entities.children(key)?.to_vec() {
        print_tree(entities, types, child, depth + 1)?;
    }
    Ok(())
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let input = input.trim();
    if input.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..input.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&input[i..i + 2], 16)
                .with_context(|| format!("bad hex byte at offset {}", i))
        })
        .collect()
}
