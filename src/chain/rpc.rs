use std::time::Duration;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, Bytes, TxKind},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log, TransactionRequest},
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tracing::{debug, info};

use super::{ChainError, ChainSource};

/// Default total timeout per chain operation, retries included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default maximum number of retry attempts per operation.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay for exponential backoff between retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

/// [`ChainSource`] backed by an alloy [`RootProvider`].
///
/// Every operation runs under a total timeout and a bounded exponential-backoff retry,
/// so callers see either a result or an exhausted [`ChainError`], never a hung future.
#[derive(Clone, Debug)]
pub struct RpcChainSource {
    provider: RootProvider,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
}

impl RpcChainSource {
    /// Wraps `provider` with the default timeout and retry settings.
    #[must_use]
    pub fn new(provider: RootProvider) -> Self {
        Self::builder(provider).build()
    }

    /// Starts a builder for customizing timeout and retry behavior.
    #[must_use]
    pub fn builder(provider: RootProvider) -> RpcChainSourceBuilder {
        RpcChainSourceBuilder {
            provider,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }

    /// Executes `operation` with exponential backoff and a total timeout.
    ///
    /// The timeout covers all retry attempts combined, so a slow endpoint cannot stall
    /// the scan loop longer than `call_timeout`.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, operation: F) -> Result<T, ChainError>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        debug!(op, "chain call");
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        let result = timeout(
            self.call_timeout,
            (|| operation(self.provider.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, after: Duration| {
                    info!(op, error = %err, "RPC error, retrying after {after:?}");
                })
                .sleep(tokio::time::sleep),
        )
        .await;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ChainError::Transport(err.to_string())),
            Err(_) => Err(ChainError::Timeout),
        }
    }
}

#[async_trait]
impl ChainSource for RpcChainSource {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.with_retry("eth_blockNumber", |provider| async move {
            provider.get_block_number().await
        })
        .await
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ChainError> {
        let block = self
            .with_retry("eth_getBlockByNumber", |provider| async move {
                provider.get_block_by_number(BlockNumberOrTag::Number(number)).await
            })
            .await?;
        Ok(block.map(|block| block.header.hash))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        self.with_retry("eth_getLogs", |provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await }
        })
        .await
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest {
            to: Some(TxKind::Call(to)),
            input: calldata.into(),
            ..Default::default()
        };
        self.with_retry("eth_call", |provider| {
            let request = request.clone();
            async move { provider.call(request).await }
        })
        .await
    }
}

/// Builder for [`RpcChainSource`].
#[derive(Debug)]
pub struct RpcChainSourceBuilder {
    provider: RootProvider,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
}

impl RpcChainSourceBuilder {
    /// Sets the total timeout per operation, retries included.
    #[must_use]
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Sets the maximum number of retry attempts per operation.
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay for exponential backoff between retries.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    #[must_use]
    pub fn build(self) -> RpcChainSource {
        RpcChainSource {
            provider: self.provider,
            call_timeout: self.call_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
        }
    }
}
