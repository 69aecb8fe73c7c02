use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::chains::arbitrum::rpc::JsonRpcClient;
use crate::chains::arbitrum::transaction::{
    bump_gas_price, preflight_gas, UnsignedTransaction, DEFAULT_ERC20_GAS_LIMIT, USDC_CONTRACT,
};
use crate::core::config::{ServiceConfig, WalletConfig};
use crate::core::errors::{CryptoError, TradeError};
use crate::core::kernel::rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig};
use crate::core::kernel::signer::Secp256k1Signer;
use crate::core::stop::StopFlag;
use crate::core::types::{Address, WalletOnchainData};
use crate::utils::format::{format_eth, format_gas_label, format_usdc};

fn step_failed(step: &str, err: TradeError) -> TradeError {
    debug!(step, error = %err, "wallet query failed");
    TradeError::RpcCallFailed {
        method: step.to_string(),
    }
}

/// Read ETH balance, gas price and USDC balance, in that order.
///
/// The first failing step short-circuits as `<step>_failed`.
pub fn fetch_wallet_data<R: RestClient>(
    rpc: &JsonRpcClient<R>,
    owner: &Address,
) -> Result<WalletOnchainData, TradeError> {
    let eth_wei = rpc
        .get_balance(owner)
        .map_err(|e| step_failed("eth_getBalance", e))?;
    let gas_price_wei = rpc.gas_price().map_err(|e| step_failed("eth_gasPrice", e))?;
    let usdc_raw = rpc
        .erc20_balance_of(&USDC_CONTRACT, owner)
        .map_err(|e| step_failed("usdc_balanceOf", e))?;

    Ok(WalletOnchainData {
        eth_balance: format_eth(eth_wei),
        usdc_balance: format_usdc(usdc_raw),
        gas: format_gas_label(gas_price_wei),
        eth_balance_wei: eth_wei,
        usdc_balance_raw: usdc_raw,
        gas_price_wei,
        rpc_ok: true,
    })
}

/// Account on Arbitrum One: balance queries plus the USDC transfer flow.
pub struct ArbitrumWallet<R: RestClient> {
    rpc: JsonRpcClient<R>,
    signer: Secp256k1Signer,
    address: Address,
    gas_limit: u128,
}

impl ArbitrumWallet<ReqwestRest> {
    /// Connect to the node named in `config`.
    pub fn from_config(config: &WalletConfig, service: &ServiceConfig) -> Result<Self, TradeError> {
        if config.arb_rpc_url.trim().is_empty() || config.wallet_address.trim().is_empty() {
            return Err(TradeError::MissingRpcOrAddress);
        }
        let address: Address = config.wallet_address.parse()?;
        let rest = RestClientBuilder::new(
            RestClientConfig::new(config.arb_rpc_url.clone(), "arbitrum".to_string())
                .with_timeout(service.http_timeout),
        )
        .build()?;
        Ok(Self::new(JsonRpcClient::new(rest, service), address))
    }
}

impl<R: RestClient> ArbitrumWallet<R> {
    pub fn new(rpc: JsonRpcClient<R>, address: Address) -> Self {
        Self {
            rpc,
            signer: Secp256k1Signer::new(),
            address,
            gas_limit: DEFAULT_ERC20_GAS_LIMIT,
        }
    }

    #[must_use]
    pub fn with_gas_limit(mut self, gas_limit: u128) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn rpc(&self) -> &JsonRpcClient<R> {
        &self.rpc
    }

    pub fn fetch(&self) -> Result<WalletOnchainData, TradeError> {
        fetch_wallet_data(&self.rpc, &self.address)
    }

    /// Build, sign and submit a USDC transfer of `amount` micro-USDC.
    ///
    /// Returns the transaction hash reported by the node.
    #[instrument(skip_all, fields(to = %recipient, amount = %amount))]
    pub fn send_usdc_transfer(
        &self,
        private_key: &[u8; 32],
        recipient: &Address,
        amount: u128,
    ) -> Result<String, TradeError> {
        if self.signer.address_of(private_key)? != self.address {
            warn!("private key does not control the configured wallet");
            return Err(CryptoError::RecoverMismatch.into());
        }

        let available = self
            .rpc
            .erc20_balance_of(&USDC_CONTRACT, &self.address)
            .map_err(|e| step_failed("usdc_balanceOf", e))?;
        if amount > available {
            return Err(TradeError::AmountExceedsAvailable {
                have: available,
                want: amount,
            });
        }

        let nonce = self.rpc.transaction_count(&self.address)?;
        let gas_price = self.rpc.gas_price()?;
        let base_fee = self.rpc.latest_base_fee()?;
        let gas_price = bump_gas_price(gas_price, base_fee);

        let eth_wei = self.rpc.get_balance(&self.address)?;
        preflight_gas(eth_wei, gas_price, self.gas_limit)?;

        let signed = UnsignedTransaction::usdc_transfer(
            nonce,
            gas_price,
            self.gas_limit,
            recipient,
            amount,
        )
        .sign(&self.signer, private_key)?;

        debug!(nonce = %nonce, gas_price = %gas_price, v = signed.v, "submitting transfer");
        let tx_hash = self.rpc.send_raw_transaction(&signed.raw_hex())?;
        info!(tx_hash = %tx_hash, "usdc transfer submitted");
        Ok(tx_hash)
    }

    /// Poll until `tx_hash` has `min_confirmations` blocks on top of (and
    /// including) the one that mined it.
    ///
    /// Transient RPC failures are retried on the next poll; a reverted receipt,
    /// the stop flag or the timeout end the wait.
    #[instrument(skip_all, fields(tx_hash = %tx_hash))]
    pub fn wait_tx_confirmations(
        &self,
        tx_hash: &str,
        min_confirmations: u64,
        timeout: Duration,
        poll_interval: Duration,
        stop: &StopFlag,
    ) -> Result<u64, TradeError> {
        let started = Instant::now();
        let slice = poll_interval.min(Duration::from_millis(100));

        loop {
            if stop.is_stopped() {
                return Err(TradeError::Cancelled);
            }

            match self.rpc.transaction_receipt(tx_hash) {
                Ok(Some(receipt)) => {
                    if receipt.success == Some(false) {
                        return Err(TradeError::TxReverted {
                            hash: tx_hash.to_string(),
                        });
                    }
                    match self.rpc.block_number() {
                        Ok(head) if head >= receipt.block_number => {
                            let confirmations = (head - receipt.block_number + 1) as u64;
                            if confirmations >= min_confirmations {
                                info!(confirmations, "transaction confirmed");
                                return Ok(confirmations);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "block number unavailable"),
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, "receipt unavailable"),
            }

            if started.elapsed() >= timeout {
                return Err(TradeError::Timeout(format!(
                    "{} not confirmed after {:?}",
                    tx_hash, timeout
                )));
            }
            if stop.sleep(poll_interval, slice) {
                return Err(TradeError::Cancelled);
            }
        }
    }
}
