//! A [`ContractProxy`] for a contract deployed on a node.

use async_trait::async_trait;
use tzpermit::michelson::{EntrypointSchema, Micheline, TypedValue};
use tzpermit::{Address, ContractProxy, EncodingError, EntrypointArgs, PermitStorage, RpcError};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::client::TezosRpcClient;
use crate::error::TezosRpcError;

/// A deployed contract: its entrypoint types are loaded once, its storage is
/// read fresh on every call.
#[derive(Debug, Clone)]
pub struct RpcContract {
    client: TezosRpcClient,
    address: Address,
    schema: EntrypointSchema,
    storage_type: Micheline,
}

impl RpcContract {
    /// Loads the script and entrypoints of the contract at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TezosRpcError`] if either request fails or the script has
    /// no `parameter` or `storage` section.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "tezos_rpc.contract_at", skip_all, err, fields(contract = %address))
    )]
    pub async fn at(client: TezosRpcClient, address: Address) -> Result<Self, TezosRpcError> {
        let script = client.contract_script(&address).await?;
        let missing = |section: &str| TezosRpcError::InvalidValue {
            context: "GET script",
            reason: format!("script has no {section} section"),
        };
        let parameter_type = script.parameter_type().ok_or_else(|| missing("parameter"))?;
        let storage_type = script.storage_type().ok_or_else(|| missing("storage"))?.clone();

        let mut entrypoints = client.contract_entrypoints(&address).await?;
        entrypoints
            .entry("default".to_owned())
            .or_insert_with(|| parameter_type.clone());

        Ok(Self {
            client,
            address,
            schema: EntrypointSchema::new(entrypoints),
            storage_type,
        })
    }

    /// The contract's entrypoint table.
    pub const fn schema(&self) -> &EntrypointSchema {
        &self.schema
    }

    /// The client the contract reads through.
    pub const fn client(&self) -> &TezosRpcClient {
        &self.client
    }
}

#[async_trait]
impl ContractProxy for RpcContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn storage(&self) -> Result<PermitStorage, RpcError> {
        let value = self.client.contract_storage(&self.address).await?;
        PermitStorage::from_storage(&self.storage_type, &value)
    }

    fn encode_entrypoint_call(&self, entrypoint: &str, args: &EntrypointArgs) -> Result<TypedValue, EncodingError> {
        self.schema.encode_call(entrypoint, &args.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tzpermit::{AddressKind, TransferArgs};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kt1() -> Address {
        Address::new(AddressKind::Originated, [9; 20])
    }

    fn permit_type() -> Value {
        json!({ "prim": "list", "args": [{ "prim": "pair", "args": [
            { "prim": "key" },
            { "prim": "pair", "args": [{ "prim": "signature" }, { "prim": "bytes" }] }
        ]}]})
    }

    fn fa12_transfer_type() -> Value {
        json!({ "prim": "pair", "args": [
            { "prim": "address", "annots": [":from"] },
            { "prim": "pair", "args": [
                { "prim": "address", "annots": [":to"] },
                { "prim": "nat", "annots": [":value"] }
            ]}
        ]})
    }

    fn storage_type() -> Value {
        json!({ "prim": "pair", "args": [
            { "prim": "big_map", "annots": ["%ledger"], "args": [{ "prim": "address" }, { "prim": "nat" }] },
            { "prim": "pair", "args": [
                { "prim": "nat", "annots": ["%permit_counter"] },
                { "prim": "nat", "annots": ["%default_expiry"] }
            ]}
        ]})
    }

    fn storage(counter: u64) -> Value {
        json!({ "prim": "Pair", "args": [
            { "int": "12" },
            { "int": counter.to_string() },
            { "int": "3600" }
        ]})
    }

    async fn mount_contract(server: &MockServer) {
        let base = format!("/chains/main/blocks/head/context/contracts/{}", kt1());
        Mock::given(method("GET"))
            .and(path(format!("{base}/script")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": [
                    { "prim": "parameter", "args": [{ "prim": "or", "args": [
                        { "prim": "list", "annots": ["%permit"], "args": permit_type()["args"] },
                        { "prim": "pair", "annots": ["%transfer"], "args": fa12_transfer_type()["args"] }
                    ]}]},
                    { "prim": "storage", "args": [storage_type()] },
                    { "prim": "code", "args": [[]] }
                ],
                "storage": storage(0)
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{base}/entrypoints")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entrypoints": { "permit": permit_type(), "transfer": fa12_transfer_type() }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_loads_entrypoints_and_default() {
        let server = MockServer::start().await;
        mount_contract(&server).await;

        let client = TezosRpcClient::try_from(server.uri()).unwrap();
        let contract = RpcContract::at(client, kt1()).await.unwrap();

        let names: Vec<&str> = contract.schema().names().collect();
        assert_eq!(names, ["default", "permit", "transfer"]);
        assert_eq!(contract.address(), kt1());
    }

    #[tokio::test]
    async fn test_storage_is_read_on_every_call() {
        let server = MockServer::start().await;
        mount_contract(&server).await;
        let storage_path = format!("/chains/main/blocks/head/context/contracts/{}/storage", kt1());
        Mock::given(method("GET"))
            .and(path(storage_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(storage(5)))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(storage_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(storage(6)))
            .expect(1)
            .mount(&server)
            .await;

        let client = TezosRpcClient::try_from(server.uri()).unwrap();
        let contract = RpcContract::at(client, kt1()).await.unwrap();

        let first = contract.storage().await.unwrap();
        let second = contract.storage().await.unwrap();

        assert_eq!(first.permit_counter, 5);
        assert_eq!(first.default_expiry, Some(3600));
        assert_eq!(second.permit_counter, 6);
    }

    #[tokio::test]
    async fn test_builds_calls_through_node_types() {
        let server = MockServer::start().await;
        mount_contract(&server).await;
        let client = TezosRpcClient::try_from(server.uri()).unwrap();
        let contract = RpcContract::at(client, kt1()).await.unwrap();
        let from = Address::new(AddressKind::Ed25519, [1; 20]);
        let to = Address::new(AddressKind::Ed25519, [2; 20]);

        let call = contract
            .build_unsigned_call("transfer", &TransferArgs::Fa12 { from, to, value: 7 }.into())
            .unwrap();

        assert_eq!(call.destination, kt1());
        assert_eq!(
            call.parameters,
            Micheline::pair(
                Micheline::string(from.to_string()),
                Micheline::pair(Micheline::string(to.to_string()), Micheline::int(7))
            )
        );
        assert_eq!(
            contract.encode_entrypoint_call("burn", &TransferArgs::Fa12 { from, to, value: 7 }.into()),
            Err(EncodingError::UnknownEntrypoint("burn".to_owned()))
        );
    }

    #[tokio::test]
    async fn test_storage_without_counter_is_rejected() {
        let server = MockServer::start().await;
        mount_contract(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/chains/main/blocks/head/context/contracts/{}/storage", kt1())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "int": "1" })))
            .mount(&server)
            .await;

        let client = TezosRpcClient::try_from(server.uri()).unwrap();
        let contract = RpcContract::at(client, kt1()).await.unwrap();

        assert_eq!(
            contract.storage().await,
            Err(RpcError::MissingStorageField("permit_counter"))
        );
    }
}
