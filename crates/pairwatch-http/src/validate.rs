//! Start-up check that every configured factory is a deployed contract.

use alloy_primitives::Address;
use serde_json::Value;

use pairwatch_core::decode::FactoryKind;
use pairwatch_core::error::WatchError;

use crate::rpc::RpcTransport;

/// Call `eth_getCode` for each factory. An address without code, or a
/// failed call, is a fatal configuration error.
pub async fn validate_factories(
    rpc: &dyn RpcTransport,
    factories: &[(FactoryKind, Address)],
) -> Result<(), WatchError> {
    if factories.is_empty() {
        return Err(WatchError::Config("no factory address configured".into()));
    }
    for (kind, address) in factories {
        let code = rpc
            .call("eth_getCode", vec![Value::String(address.to_string()), Value::String("latest".into())])
            .await
            .map_err(|e| WatchError::Config(format!("cannot verify {kind} factory {address}: {e}")))?;

        let has_code = code.as_str().is_some_and(|hex| {
            let digits = hex.trim_start_matches("0x");
            !digits.is_empty() && digits.bytes().any(|b| b != b'0')
        });
        if !has_code {
            return Err(WatchError::Config(format!(
                "{kind} factory {address} has no contract code on {}",
                rpc.url()
            )));
        }
        tracing::info!(%kind, %address, "factory verified");
    }
    Ok(())
}
