#![allow(unused)]
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
    sync::RwLock,
};

use crate::api::{EventId, Prediction};
use crate::chain::RpcLedger;
use crate::client::PredictionApi;
use crate::config::Settings;
use crate::flow::{Flow, FlowConfig, Session};
use crate::ledger::{AccessLedger, MemoryLedger};

mod api;
mod chain;
mod client;
mod config;
mod error;
mod flow;
mod ledger;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Overrides the configured prediction-service URL.
    #[arg(short, long)]
    url: Option<String>,
    /// Runs against an in-memory ledger instead of the configured node.
    #[arg(short, long)]
    test: bool,
}
#[derive(Subcommand)]
enum Commands {
    /// Lists the upcoming schedule.
    Schedule,
    /// Unlocks and prints the prediction for one game, paying the
    /// contract fee first if this wallet has not paid yet.
    Predict {
        #[arg(short, long)]
        event: EventId,
    },
    /// Prints the ledger's advertised prediction price.
    Price,
    /// Checks whether this wallet already has access to a game.
    Access {
        #[arg(short, long)]
        event: EventId,
    },
    /// Sweeps accumulated fees to the contract owner.
    Withdraw,
    GenerateKeys,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Args::parse();
    let settings = Settings::load()?;
    let api = PredictionApi::new(cli.url.unwrap_or_else(|| settings.api_url.clone()));

    match cli.command {
        Commands::Schedule => {
            let schedule = api.fetch_schedule().await?;
            for event in schedule {
                println!("{}", event);
            }
        }
        Commands::Predict { event } => {
            let account = read_account(&settings).await?;
            let ledger = build_ledger(&settings, cli.test, account)?;
            let schedule = api.fetch_schedule().await?;
            let event = schedule
                .into_iter()
                .find(|e| e.id == event)
                .ok_or(anyhow!("game {} is not on the upcoming schedule", event))?;
            let session = Arc::new(RwLock::new(Session::new()));
            session.write().await.connect(account);
            let flow = Flow::new(api, ledger, flow_config(&settings));
            let prediction = flow.get_prediction(&session, &event).await?;
            print_prediction(&prediction);
        }
        Commands::Price => {
            let account = read_account(&settings).await?;
            let ledger = build_ledger(&settings, cli.test, account)?;
            println!("{} wei", ledger.price().await?);
        }
        Commands::Access { event } => {
            let account = read_account(&settings).await?;
            let ledger = build_ledger(&settings, cli.test, account)?;
            let granted = ledger.can_access(account, event).await?;
            println!(
                "{} {} access to game {}",
                account,
                if granted { "has" } else { "does not have" },
                event
            );
        }
        Commands::Withdraw => {
            let account = read_account(&settings).await?;
            let ledger = build_ledger(&settings, cli.test, account)?;
            let session = Arc::new(RwLock::new(Session::new()));
            session.write().await.connect(account);
            let flow = Flow::new(api, ledger, flow_config(&settings));
            let amount = flow.withdraw(&session).await?;
            println!("Withdrew {} wei", amount);
        }
        Commands::GenerateKeys => {
            let signer = PrivateKeySigner::random();
            println!("Address: {}", signer.address());
            let mut private = File::create(settings.key_file.as_str()).await?;
            let mut public = File::create("wallet.pub").await?;
            private
                .write_all(hex::encode(signer.to_bytes()).as_bytes())
                .await?;
            public.write_all(signer.address().to_string().as_bytes()).await?;
        }
    }
    Ok(())
}

fn flow_config(settings: &Settings) -> FlowConfig {
    FlowConfig {
        poll_interval: settings.poll_interval(),
        settlement_timeout: settings.settlement_timeout(),
        fallback_price: settings.fallback_price(),
    }
}

fn build_ledger(
    settings: &Settings,
    test: bool,
    account: Address,
) -> Result<Arc<dyn AccessLedger + Send + Sync>> {
    if test {
        let ledger = MemoryLedger::new(account, settings.fallback_price());
        ledger.fund(account, settings.fallback_price() * U256::from(10u64));
        Ok(Arc::new(ledger))
    } else {
        Ok(Arc::new(RpcLedger::new(
            settings.rpc_url.clone(),
            settings.contract()?,
            settings.chain_id,
            account,
        )))
    }
}

async fn read_account(settings: &Settings) -> Result<Address> {
    let mut file = File::open(settings.key_file.as_str())
        .await
        .with_context(|| {
            format!(
                "no key file at {}, run generate-keys first",
                settings.key_file
            )
        })?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    let signer = String::from_utf8(contents)?
        .trim()
        .parse::<PrivateKeySigner>()?;
    Ok(signer.address())
}

fn print_prediction(prediction: &Prediction) {
    println!("{}", prediction.matchup);
    if let Some(date) = &prediction.date {
        println!("Date: {}", date);
    }
    for (team, advantages) in &prediction.statistical_analysis.advantages {
        println!("{}:", team);
        for advantage in advantages {
            println!("  + {}", advantage);
        }
    }
    for (team, score) in &prediction.confidence_scores {
        println!("{}: {:.1}% confidence", team, score);
    }
    for rec in &prediction.betting_recommendations {
        match (rec.odds, rec.confidence) {
            (Some(odds), Some(confidence)) => println!(
                "[{}] {} @ {:.2} ({:.0}%) | {}",
                rec.kind, rec.bet, odds, confidence, rec.explanation
            ),
            _ => println!("[{}] {} | {}", rec.kind, rec.bet, rec.explanation),
        }
    }
}
