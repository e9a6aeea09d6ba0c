//! Terminal rendering of an outcome record.

use comfy_table::{Table, presets::UTF8_FULL};
use hatchery_deploy::{ExitSignal, OutcomeRecord};

pub fn render(record: &OutcomeRecord, exit: ExitSignal) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);

    table.add_row(vec!["Network".to_string(), record.network.clone()]);
    table.add_row(vec!["Kind".to_string(), record.kind.to_string()]);
    table.add_row(vec!["Contract".to_string(), record.contract.clone()]);

    if let Some(address) = record.address {
        table.add_row(vec!["Address".to_string(), address.to_checksum(None)]);
    }
    if let Some(tx_hash) = record.transaction_hash {
        table.add_row(vec!["Transaction".to_string(), tx_hash.to_string()]);
    }
    if let Some(confirmations) = record.block_confirmations {
        table.add_row(vec!["Confirmations".to_string(), confirmations.to_string()]);
    }

    if let Some(proxy) = &record.proxy {
        table.add_row(vec!["Proxy kind".to_string(), proxy.kind.to_string()]);
        table.add_row(vec![
            "Implementation".to_string(),
            proxy.implementation.to_checksum(None),
        ]);
        if let Some(admin) = proxy.admin {
            table.add_row(vec!["Proxy admin".to_string(), admin.to_checksum(None)]);
        }
        if let Some(beacon) = proxy.beacon {
            table.add_row(vec!["Beacon".to_string(), beacon.to_checksum(None)]);
        }
    }

    // On failure these are the only record of what reached the chain.
    if record.error.is_some() {
        for contract in &record.deployed {
            table.add_row(vec![
                format!("Deployed {}", contract.role),
                format!("{} ({})", contract.address.to_checksum(None), contract.identifier),
            ]);
        }
    }

    for read in &record.reads {
        let value = match &read.error {
            Some(error) => format!("error: {error}"),
            None => read.values.join(", "),
        };
        table.add_row(vec![read.call.clone(), value]);
    }

    if let Some(verification) = &record.verification {
        table.add_row(vec![
            "Verification".to_string(),
            format!(
                "{} ({} attempt(s))",
                verification.status,
                verification.attempts.len()
            ),
        ]);
    }
    if let Some(error) = &record.error {
        table.add_row(vec!["Error".to_string(), error.clone()]);
    }
    table.add_row(vec!["Result".to_string(), exit.to_string()]);

    table
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::Address;
    use hatchery_deploy::{ContractRole, DeployedContract, DeploymentKind, ReadResult};

    use super::*;

    fn record() -> OutcomeRecord {
        OutcomeRecord {
            network: "localhost".to_string(),
            kind: DeploymentKind::Proxy,
            contract: "CounterV1".to_string(),
            address: Some(Address::repeat_byte(0x11)),
            transaction_hash: None,
            block_confirmations: None,
            proxy: None,
            deployed: vec![DeployedContract {
                role: ContractRole::Implementation,
                identifier: "CounterV1".to_string(),
                address: Address::repeat_byte(0x22),
                transaction_hash: None,
            }],
            reads: vec![ReadResult {
                call: "count()".to_string(),
                values: vec!["42".to_string()],
                error: None,
            }],
            verification: None,
            error: None,
            recorded_at: Default::default(),
        }
    }

    #[test]
    fn test_success_table() {
        let rendered = render(&record(), ExitSignal::Success).to_string();
        assert!(rendered.contains("count()"));
        assert!(rendered.contains("42"));
        assert!(rendered.contains("success"));
        assert!(!rendered.contains("Deployed implementation"));
    }

    #[test]
    fn test_failure_lists_deployed_contracts() {
        let mut record = record();
        record.error = Some("cancelled while waiting for deployment of ERC1967Proxy".to_string());

        let rendered = render(&record, ExitSignal::Failure).to_string();
        assert!(rendered.contains("Deployed implementation"));
        assert!(rendered.contains("failure"));
    }
}
