//! # Presale CLI
use crate::{
    config::PurchaseConfig,
    constants::DEFAULT_CONFIG_PATH,
    error::PurchaseError,
    service::PurchaseHandle,
    spawn::try_spawn_with_args,
    types::Currency,
};
use alloy::primitives::{Address, ChainId};
use clap::Parser;
use serde::Serialize;
use std::{path::PathBuf, str::FromStr, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use url::Url;

/// Buys sale tokens from a tiered on-chain token sale.
#[derive(Debug, Parser)]
#[command(author, about = "Presale", long_about = None)]
pub struct Args {
    /// The configuration file.
    ///
    /// If missing, a default one will be used and stored in the working directory under
    /// `presale.yaml`.
    #[arg(long, value_name = "CONFIG", env = "PRESALE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// The RPC endpoint of the wallet provider.
    ///
    /// Must be a valid HTTP or HTTPS URL pointing to an Ethereum JSON-RPC endpoint.
    #[arg(long = "endpoint", value_name = "RPC_ENDPOINT", env = "PRESALE_RPC_URL")]
    pub endpoint: Option<Url>,
    /// The chain the sale lives on.
    #[arg(long = "chain-id", value_name = "CHAIN_ID")]
    pub chain_id: Option<ChainId>,
    /// The address of the sale contract.
    #[arg(long = "sale-contract", value_name = "ADDRESS")]
    pub sale_contract: Option<Address>,
    /// The endpoint returning the native asset price.
    #[arg(long = "price-feed-url", value_name = "URL", env = "PRESALE_PRICE_FEED_URL")]
    pub price_feed_url: Option<Url>,
    /// The lifetime of a fetched native price.
    #[arg(long, value_name = "SECONDS", value_parser = parse_duration_secs)]
    pub rate_ttl: Option<Duration>,
    /// A constant native price. Disables the price feed.
    #[arg(long = "constant-rate", value_name = "PRICE")]
    pub constant_rate: Option<f64>,
    /// The private key to sign transactions with.
    #[arg(long = "private-key", value_name = "SECRET_KEY", env = "PRESALE_PRIVATE_KEY")]
    pub private_key: Option<String>,
}

impl Args {
    /// Runs the purchase console on stdin.
    pub async fn run(self) -> eyre::Result<()> {
        let config_path = self.config.clone();
        let engine = try_spawn_with_args(self, &config_path).await?;
        let handle = engine.handle();

        print_json(&handle.snapshot())?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let command = match line.parse::<ConsoleCommand>() {
                Ok(command) => command,
                Err(err) => {
                    eprintln!("{err}");
                    continue;
                }
            };
            if command == ConsoleCommand::Quit {
                break;
            }

            match command.execute(&handle).await {
                Ok(()) => print_json(&handle.snapshot())?,
                Err(PurchaseError::ServiceStopped) => {
                    return Err(PurchaseError::ServiceStopped.into());
                }
                Err(err) => {
                    warn!(%err, ?command, "Command failed");
                    eprintln!("error: {err}");
                }
            }
        }

        Ok(())
    }

    /// Merges [`Args`] values into an existing [`PurchaseConfig`] instance.
    pub fn merge_purchase_config(self, mut config: PurchaseConfig) -> PurchaseConfig {
        if let Some(endpoint) = self.endpoint {
            config = config.with_endpoint(endpoint);
        }
        if let Some(chain_id) = self.chain_id {
            config = config.with_required_chain_id(chain_id);
        }
        if let Some(sale_contract) = self.sale_contract {
            config = config.with_sale_contract(sale_contract);
        }
        if let Some(rate_ttl) = self.rate_ttl {
            config = config.with_rate_ttl(rate_ttl);
        }
        if self.price_feed_url.is_some() {
            config = config.with_price_feed_url(self.price_feed_url);
        }
        if self.constant_rate.is_some() {
            config = config.with_constant_rate(self.constant_rate);
        }
        config.with_private_key(self.private_key)
    }
}

/// A line entered in the purchase console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `currency <eth|usdt|usdc>`
    Currency(Currency),
    /// `edit-pay <amount>`
    EditPay(String),
    /// `edit-token <amount>`
    EditToken(String),
    /// `pay <amount>`
    Pay(String),
    /// `token <amount>`
    Token(String),
    /// `buy`
    Buy,
    /// `confirm`
    Confirm,
    /// `reset`
    Reset,
    /// `switch`
    Switch,
    /// `refresh`
    Refresh,
    /// `status`
    Status,
    /// `quit`
    Quit,
}

impl ConsoleCommand {
    /// Runs the command against the purchase service.
    pub async fn execute(&self, handle: &PurchaseHandle) -> Result<(), PurchaseError> {
        match self {
            Self::Currency(currency) => handle.set_currency(*currency).await,
            Self::EditPay(amount) => handle.edit_pay_amount(amount.as_str()),
            Self::EditToken(amount) => handle.edit_token_amount(amount.as_str()),
            Self::Pay(amount) => handle.commit_pay_amount(amount.as_str()).await.map(drop),
            Self::Token(amount) => handle.commit_token_amount(amount.as_str()).await.map(drop),
            Self::Buy => handle.approve_or_purchase().await,
            Self::Confirm => handle.confirm_purchase().await,
            Self::Reset => handle.close_and_reset().await,
            Self::Switch => handle.switch_network().await.map(drop),
            Self::Refresh => handle.refresh_sale_state().await.map(drop),
            Self::Status | Self::Quit => Ok(()),
        }
    }
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::to_string);
        let amount = |arg: Option<String>| arg.ok_or_else(|| format!("{verb} expects an amount"));

        match verb.as_str() {
            "currency" => arg
                .ok_or_else(|| "currency expects one of eth, usdt, usdc".to_string())?
                .parse()
                .map(Self::Currency),
            "edit-pay" => amount(arg).map(Self::EditPay),
            "edit-token" => amount(arg).map(Self::EditToken),
            "pay" => amount(arg).map(Self::Pay),
            "token" => amount(arg).map(Self::Token),
            "buy" => Ok(Self::Buy),
            "confirm" => Ok(Self::Confirm),
            "reset" => Ok(Self::Reset),
            "switch" => Ok(Self::Switch),
            "refresh" => Ok(Self::Refresh),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parses a string representing seconds to a [`Duration`].
fn parse_duration_secs(arg: &str) -> Result<std::time::Duration, std::num::ParseIntError> {
    let seconds = arg.parse()?;
    Ok(std::time::Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_console_commands() {
        assert_eq!("currency usdt".parse(), Ok(ConsoleCommand::Currency(Currency::USDT)));
        assert_eq!("pay 1.5".parse(), Ok(ConsoleCommand::Pay("1.5".into())));
        assert_eq!("TOKEN 100".parse(), Ok(ConsoleCommand::Token("100".into())));
        assert_eq!("edit-pay 2".parse(), Ok(ConsoleCommand::EditPay("2".into())));
        assert_eq!("exit".parse(), Ok(ConsoleCommand::Quit));
        assert!("pay".parse::<ConsoleCommand>().is_err());
        assert!("currency dai".parse::<ConsoleCommand>().is_err());
        assert!("sell 1".parse::<ConsoleCommand>().is_err());
    }

    #[test]
    fn merge_keeps_file_values() {
        let args = Args::parse_from([
            "presale",
            "--endpoint",
            "http://localhost:8545",
            "--chain-id",
            "11155111",
            "--constant-rate",
            "3000",
        ]);
        let config = args.merge_purchase_config(
            PurchaseConfig::default().with_private_key(Some("0x01".to_string())),
        );

        assert_eq!(config.chain.required_chain_id, 11155111);
        assert_eq!(config.chain.endpoint.unwrap().as_str(), "http://localhost:8545/");
        assert_eq!(config.pricefeed.constant_rate, Some(3000.0));
        assert_eq!(config.secrets.private_key.as_deref(), Some("0x01"));
        assert_eq!(config.sale.contract, Address::ZERO);
    }
}
