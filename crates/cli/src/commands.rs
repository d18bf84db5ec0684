//! Command implementations: thin wrappers over the remote client.

use anyhow::{bail, Result};
use chainview_core::{client::RemoteClient, codec::BlockHash, tracker::ChainTracker};

pub async fn network(client: &RemoteClient) -> Result<()> {
    println!("{}", client.network().await?);
    Ok(())
}

pub async fn height(client: &RemoteClient) -> Result<()> {
    println!("{}", client.get_height().await);
    Ok(())
}

pub async fn tip(client: &RemoteClient) -> Result<()> {
    match client.fetch_tip().await {
        Ok(tip) => {
            println!("{}", serde_json::to_string_pretty(tip.as_ref())?);
            Ok(())
        }
        Err(err) => bail!("failed to fetch tip: {err}"),
    }
}

pub async fn header(
    client: &RemoteClient,
    height: Option<u32>,
    hash: Option<String>,
) -> Result<()> {
    let header = match (height, hash) {
        (Some(height), None) => client.header_by_height(height).await?,
        (None, Some(hash)) => {
            let hash: BlockHash = hash.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
            client.header_by_hash(&hash).await?
        }
        _ => bail!("provide exactly one of --height or --hash"),
    };
    println!("{}", serde_json::to_string_pretty(header.as_ref())?);
    Ok(())
}

pub async fn headers(client: &RemoteClient, height: u32, count: u32) -> Result<()> {
    let headers = client.headers(height, count).await?;
    if headers.is_empty() {
        bail!("no headers returned for height {height}");
    }
    for header in &headers {
        println!("{:>8}  {}", header.height, hex::encode(header.to_bytes()));
    }
    Ok(())
}

pub async fn watch(client: &RemoteClient) -> Result<()> {
    let mut subscription = client.subscribe();
    eprintln!("watching tip updates (ctrl-c to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            tip = subscription.recv() => {
                match tip {
                    Some(tip) => println!("{}", serde_json::to_string(tip.as_ref())?),
                    None => bail!("tip stream closed"),
                }
            }
        }
    }
    Ok(())
}
