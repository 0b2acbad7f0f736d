//! A [`ChainClient`] backed by a Tezos node's JSON RPC.
//!
//! [`TezosRpcClient`] reads chain state from `chains/main/blocks/head`, packs
//! data through `helpers/scripts/pack_data` and simulates operation groups
//! through `helpers/scripts/run_operation`. Simulated groups declare gas
//! within the head block's `context/constants`.
//!
//! ## Features
//!
//! - Uses `reqwest` for async HTTP requests
//! - Supports optional timeout and headers
//! - Caches the chain id; never caches counters or storage
//! - Integrates with `tracing` if the `telemetry` feature is enabled

use alloy_primitives::Bytes;
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tzpermit::constants::HARD_GAS_LIMIT_PER_OPERATION;
use tzpermit::encoding::hex_bytes;
use tzpermit::michelson::{Micheline, TransactionContent};
use tzpermit::{
    Address, ChainClient, ChainId, EstimationError, FeeEstimate, GasStationConfig, RpcError,
    Signature, Signer, UnsignedCall,
};
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span, instrument};

use crate::error::TezosRpcError;
use crate::simulate::{
    ProtocolConstants, RunOperationRequest, RunOperationResponse, UnsignedOperation, fee_estimates,
};

/// A contract's code and current storage, as returned by the `script` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractScript {
    /// The `parameter`, `storage` and `code` sections (and any views).
    pub code: Micheline,
    /// Current storage value.
    pub storage: Micheline,
}

impl ContractScript {
    fn section(&self, name: &str) -> Option<&Micheline> {
        let Micheline::Seq(sections) = &self.code else {
            return None;
        };
        sections
            .iter()
            .find(|s| s.prim_name() == Some(name))
            .and_then(|s| s.args().first())
    }

    /// Type of the contract's parameter.
    #[must_use]
    pub fn parameter_type(&self) -> Option<&Micheline> {
        self.section("parameter")
    }

    /// Type of the contract's storage.
    #[must_use]
    pub fn storage_type(&self) -> Option<&Micheline> {
        self.section("storage")
    }
}

#[derive(Debug, Serialize)]
struct PackRequest<'a> {
    data: &'a Micheline,
    #[serde(rename = "type")]
    ty: &'a Micheline,
    gas: String,
}

#[derive(Debug, Deserialize)]
struct PackResponse {
    #[serde(deserialize_with = "hex_bytes::deserialize")]
    packed: Bytes,
}

#[derive(Debug, Deserialize)]
struct EntrypointsResponse {
    entrypoints: BTreeMap<String, Micheline>,
}

/// A client for one Tezos node.
///
/// Clones share the chain id cache.
#[derive(Clone, Debug)]
pub struct TezosRpcClient {
    /// Base URL of the node (e.g. `https://rpc.tzbeta.net/`)
    base_url: Url,
    /// Full URL to `GET chains/main/chain_id`
    chain_id_url: Url,
    /// Full URL to `GET chains/main/blocks/head/hash`
    head_hash_url: Url,
    /// Full URL to `GET chains/main/blocks/head/context/constants`
    constants_url: Url,
    /// Full URL to `POST .../helpers/scripts/pack_data`
    pack_data_url: Url,
    /// Full URL to `POST .../helpers/scripts/run_operation`
    run_operation_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Optional custom headers sent with each request
    headers: HeaderMap,
    /// Optional request timeout
    timeout: Option<Duration>,
    chain_id: Arc<RwLock<Option<ChainId>>>,
}

#[async_trait]
impl ChainClient for TezosRpcClient {
    async fn pack_data(&self, data: &Micheline, ty: &Micheline) -> Result<Bytes, RpcError> {
        Ok(Self::pack_data(self, data, ty).await?)
    }

    async fn chain_id(&self) -> Result<ChainId, RpcError> {
        Ok(Self::chain_id(self).await?)
    }

    #[cfg(feature = "telemetry")]
    async fn estimate_batch(
        &self,
        source: &dyn Signer,
        calls: &[UnsignedCall],
    ) -> Result<Vec<FeeEstimate>, EstimationError> {
        with_span(
            self.simulate(source, calls),
            tracing::info_span!("tezos_rpc.estimate_batch", operations = calls.len(), timeout = ?self.timeout),
        )
        .await
    }

    #[cfg(not(feature = "telemetry"))]
    async fn estimate_batch(
        &self,
        source: &dyn Signer,
        calls: &[UnsignedCall],
    ) -> Result<Vec<FeeEstimate>, EstimationError> {
        self.simulate(source, calls).await
    }
}

impl TezosRpcClient {
    /// Returns the base URL used by this client.
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns any custom headers configured on the client.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the configured timeout, if any.
    pub const fn timeout(&self) -> &Option<Duration> {
        &self.timeout
    }

    /// Constructs a new [`TezosRpcClient`] from a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, TezosRpcError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| TezosRpcError::UrlParse { context, source })
        };
        Ok(Self {
            chain_id_url: join("chains/main/chain_id", "Failed to construct chain_id URL")?,
            head_hash_url: join("chains/main/blocks/head/hash", "Failed to construct head hash URL")?,
            constants_url: join(
                "chains/main/blocks/head/context/constants",
                "Failed to construct constants URL",
            )?,
            pack_data_url: join(
                "chains/main/blocks/head/helpers/scripts/pack_data",
                "Failed to construct pack_data URL",
            )?,
            run_operation_url: join(
                "chains/main/blocks/head/helpers/scripts/run_operation",
                "Failed to construct run_operation URL",
            )?,
            client: Client::new(),
            base_url,
            headers: HeaderMap::new(),
            timeout: None,
            chain_id: Arc::default(),
        })
    }

    /// Constructs a client for the node and timeout of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError::UrlParse`] if `rpc_url` is not a valid URL.
    pub fn from_config(config: &GasStationConfig) -> Result<Self, TezosRpcError> {
        let client = Self::try_from(config.rpc_url.as_str())?;
        Ok(match config.request_timeout_secs {
            Some(secs) => client.with_timeout(Duration::from_secs(secs)),
            None => client,
        })
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the chain id, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails or the id is malformed.
    pub async fn chain_id(&self) -> Result<ChainId, TezosRpcError> {
        if let Some(chain_id) = *self.chain_id.read().await {
            return Ok(chain_id);
        }

        #[cfg(feature = "telemetry")]
        tracing::debug!("tezos_rpc.chain_id_cache_miss");

        let raw: String = self.get_json(&self.chain_id_url, "GET chain_id").await?;
        let chain_id = raw.parse::<ChainId>().map_err(|e| TezosRpcError::InvalidValue {
            context: "GET chain_id",
            reason: e.to_string(),
        })?;
        *self.chain_id.write().await = Some(chain_id);
        Ok(chain_id)
    }

    /// Packs `data` of type `ty` on the node.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails; an ill-typed value
    /// surfaces as [`TezosRpcError::HttpStatus`].
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "tezos_rpc.pack_data", skip_all, err)
    )]
    pub async fn pack_data(&self, data: &Micheline, ty: &Micheline) -> Result<Bytes, TezosRpcError> {
        let request = PackRequest {
            data,
            ty,
            gas: HARD_GAS_LIMIT_PER_OPERATION.to_string(),
        };
        let response: PackResponse = self
            .post_json(&self.pack_data_url, "POST pack_data", &request)
            .await?;
        Ok(response.packed)
    }

    /// Fetches the counter of an implicit account.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails or the counter is not a
    /// number.
    pub async fn counter(&self, account: &Address) -> Result<u64, TezosRpcError> {
        let url = self.contract_url(account, "counter")?;
        let raw: String = self.get_json(&url, "GET counter").await?;
        raw.parse().map_err(|_| TezosRpcError::InvalidValue {
            context: "GET counter",
            reason: format!("{raw:?} is not a counter"),
        })
    }

    /// Fetches the hash of the head block.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails.
    pub async fn head_hash(&self) -> Result<String, TezosRpcError> {
        self.get_json(&self.head_hash_url, "GET head hash").await
    }

    /// Fetches the resource limits of the head block's protocol.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails.
    pub async fn constants(&self) -> Result<ProtocolConstants, TezosRpcError> {
        self.get_json(&self.constants_url, "GET constants").await
    }

    /// Fetches a contract's code and storage.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails.
    pub async fn contract_script(&self, contract: &Address) -> Result<ContractScript, TezosRpcError> {
        let url = self.contract_url(contract, "script")?;
        self.get_json(&url, "GET script").await
    }

    /// Fetches a contract's current storage value.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails.
    pub async fn contract_storage(&self, contract: &Address) -> Result<Micheline, TezosRpcError> {
        let url = self.contract_url(contract, "storage")?;
        self.get_json(&url, "GET storage").await
    }

    /// Fetches a contract's entrypoints and their parameter types.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails.
    pub async fn contract_entrypoints(
        &self,
        contract: &Address,
    ) -> Result<BTreeMap<String, Micheline>, TezosRpcError> {
        let url = self.contract_url(contract, "entrypoints")?;
        let response: EntrypointsResponse = self.get_json(&url, "GET entrypoints").await?;
        Ok(response.entrypoints)
    }

    /// Runs an operation group without checking its signature.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if the request fails.
    pub async fn run_operation(
        &self,
        request: &RunOperationRequest<'_>,
    ) -> Result<RunOperationResponse, TezosRpcError> {
        self.post_json(&self.run_operation_url, "POST run_operation", request)
            .await
    }

    /// Simulates `calls` as one group sent by `source`, with consecutive
    /// counters. Each content gets the operation storage limit and an equal
    /// share of the block gas limit, capped at the operation gas limit.
    async fn simulate(
        &self,
        source: &dyn Signer,
        calls: &[UnsignedCall],
    ) -> Result<Vec<FeeEstimate>, EstimationError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let source = source
            .public_key_hash()
            .await
            .map_err(EstimationError::Source)?;
        let counter = self.counter(&source).await?;
        let branch = self.head_hash().await?;
        let chain_id = Self::chain_id(self).await?;
        let constants = self.constants().await?;
        let gas_limit = constants.gas_limit_per_content(calls.len());

        let contents = calls
            .iter()
            .zip(1u64..)
            .map(|(call, offset)| {
                let counter = counter.checked_add(offset).ok_or(EstimationError::Overflow)?;
                let mut content = TransactionContent::new(source, call.destination, counter)
                    .with_parameters(call.entrypoint.clone(), call.parameters.clone())
                    .with_limits(gas_limit, constants.hard_storage_limit_per_operation);
                content.amount = call.amount;
                Ok(content)
            })
            .collect::<Result<Vec<_>, EstimationError>>()?;

        let request = RunOperationRequest {
            operation: UnsignedOperation {
                branch: &branch,
                contents: &contents,
                signature: Signature::zero(),
            },
            chain_id,
        };
        let response = self.run_operation(&request).await?;
        fee_estimates(&contents, &response)
    }

    fn contract_url(&self, contract: &Address, leaf: &str) -> Result<Url, TezosRpcError> {
        self.base_url
            .join(&format!("chains/main/blocks/head/context/contracts/{contract}/{leaf}"))
            .map_err(|source| TezosRpcError::UrlParse {
                context: "Failed to construct contract URL",
                source,
            })
    }

    /// Generic POST helper that handles JSON serialization, error mapping,
    /// timeout application, and telemetry integration.
    ///
    /// `context` is a human-readable identifier used in tracing and error messages (e.g. `"POST pack_data"`).
    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, TezosRpcError>
    where
        T: Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| TezosRpcError::Http { context, source: e })?;

        let result = read_json(http_response, context).await;
        record_result_on_span(&result);
        result
    }

    /// Generic GET helper that handles error mapping, timeout application,
    /// and telemetry integration.
    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, TezosRpcError>
    where
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.get(url.clone());
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| TezosRpcError::Http { context, source: e })?;

        let result = read_json(http_response, context).await;
        record_result_on_span(&result);
        result
    }
}

async fn read_json<R>(http_response: reqwest::Response, context: &'static str) -> Result<R, TezosRpcError>
where
    R: serde::de::DeserializeOwned,
{
    if http_response.status() == StatusCode::OK {
        http_response
            .json::<R>()
            .await
            .map_err(|e| TezosRpcError::JsonDeserialization { context, source: e })
    } else {
        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| TezosRpcError::ResponseBodyRead { context, source: e })?;
        Err(TezosRpcError::HttpStatus {
            context,
            status,
            body,
        })
    }
}

/// Converts a string URL into a `TezosRpcClient`, parsing the URL and calling `try_new`.
impl TryFrom<&str> for TezosRpcClient {
    type Error = TezosRpcError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Relative joins need exactly one trailing slash.
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| TezosRpcError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

impl TryFrom<String> for TezosRpcClient {
    type Error = TezosRpcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// Records the outcome of a request on a tracing span, including status and errors.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to node failed");
        }
    }
}

/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

/// Instruments a future with a given tracing span.
#[cfg(feature = "telemetry")]
fn with_span<F: Future>(fut: F, span: Span) -> impl Future<Output = F::Output> {
    fut.instrument(span)
}
