// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance inventory for `seckill list`.

use std::fmt;

use serde::Serialize;
use tracing::warn;

use seckill_core::Session;
use seckill_core::provider::{Instance, ProviderError, Vnic};

/// One row of the inventory table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryRow {
    pub display_name: String,
    pub lifecycle_state: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub ipv6: Option<String>,
    pub boot_volume_gb: Option<u64>,
}

/// All live instances in the session compartment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub rows: Vec<InventoryRow>,
}

/// List instances with their addresses and boot volume size.
///
/// Terminated instances are skipped. Address and volume lookups are
/// best-effort per row; only the instance listing itself can fail.
pub async fn collect(session: &Session) -> Result<Inventory, ProviderError> {
    let instances = session
        .compute
        .list_instances(&session.compartment_id)
        .await?;

    let mut rows = Vec::new();
    for instance in instances.iter().filter(|i| !i.is_gone()) {
        let mut row = InventoryRow {
            display_name: instance.display_name.clone(),
            lifecycle_state: instance.lifecycle_state.clone(),
            ..Default::default()
        };

        match primary_vnic(session, instance).await {
            Ok(Some(vnic)) => {
                row.public_ip = vnic.public_ip;
                row.private_ip = vnic.private_ip;
                row.ipv6 = vnic.ipv6_addresses.into_iter().next();
            }
            Ok(None) => {}
            Err(e) => warn!(instance_id = %instance.id, error = %e, "Could not read VNIC"),
        }

        match boot_volume_size(session, instance).await {
            Ok(size) => row.boot_volume_gb = size,
            Err(e) => warn!(instance_id = %instance.id, error = %e, "Could not read boot volume"),
        }

        rows.push(row);
    }

    Ok(Inventory { rows })
}

async fn primary_vnic(session: &Session, instance: &Instance) -> Result<Option<Vnic>, ProviderError> {
    let attachments = session
        .compute
        .list_vnic_attachments(&session.compartment_id, &instance.id)
        .await?;
    match attachments
        .iter()
        .find(|a| a.lifecycle_state == "ATTACHED" && !a.vnic_id.is_empty())
    {
        Some(attachment) => session.compute.get_vnic(&attachment.vnic_id).await.map(Some),
        None => Ok(None),
    }
}

async fn boot_volume_size(
    session: &Session,
    instance: &Instance,
) -> Result<Option<u64>, ProviderError> {
    let attachments = session
        .compute
        .list_boot_volume_attachments(
            &session.compartment_id,
            &instance.availability_domain,
            &instance.id,
        )
        .await?;
    match attachments.first() {
        Some(attachment) => Ok(session
            .compute
            .get_boot_volume(&attachment.boot_volume_id)
            .await?
            .size_in_gbs),
        None => Ok(None),
    }
}

const HEADERS: [&str; 6] = ["NAME", "STATE", "PUBLIC IPV4", "PRIVATE IPV4", "IPV6", "BOOT"];

impl InventoryRow {
    fn cells(&self) -> [String; 6] {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        [
            self.display_name.clone(),
            self.lifecycle_state.clone(),
            or_dash(&self.public_ip),
            or_dash(&self.private_ip),
            or_dash(&self.ipv6),
            self.boot_volume_gb
                .map(|gb| format!("{}G", gb))
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// Plain aligned table.
impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return writeln!(f, "No instances found.");
        }

        let cells: Vec<[String; 6]> = self.rows.iter().map(InventoryRow::cells).collect();
        let mut widths = HEADERS.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let write_row = |f: &mut fmt::Formatter<'_>, row: &[&str]| -> fmt::Result {
            let line: Vec<String> = row
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect();
            writeln!(f, "{}", line.join("  ").trim_end())
        };

        write_row(f, &HEADERS)?;
        for row in &cells {
            let refs: Vec<&str> = row.iter().map(String::as_str).collect();
            write_row(f, &refs)?;
        }
        Ok(())
    }
}
