//! CSV exports of sales and client reports.

use crate::store::cell_text;
use anyhow::{Context, Result};
use csv::QuoteStyle;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const BOM: &str = "\u{feff}";

const SALES_HEADER: [&str; 7] = [
    "N° commande",
    "Date",
    "Client",
    "Email",
    "Code client",
    "Total",
    "Statut",
];

const CLIENTS_HEADER: [&str; 8] = [
    "Code client",
    "Prénom",
    "Nom",
    "Email",
    "Téléphone",
    "WhatsApp",
    "Date de naissance",
    "Adresse",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Sales,
    Clients,
}

impl ExportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Sales => "sales",
            ExportKind::Clients => "clients",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sales" => Ok(ExportKind::Sales),
            "clients" => Ok(ExportKind::Clients),
            other => anyhow::bail!("unknown export: {other} (expected sales or clients)"),
        }
    }
}

/// `<type>_export_<YYYY-MM-DD>.csv`
pub fn export_filename(kind: ExportKind, date: &str) -> String {
    format!("{}_export_{}.csv", kind, date)
}

/// Write a BOM-prefixed CSV document.
pub fn bom_csv<I, R>(header: &[&str], rows: I, quote: QuoteStyle) -> Result<String>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .quote_style(quote)
        .from_writer(BOM.as_bytes().to_vec());

    writer.write_record(header).context("Failed to write CSV header")?;
    for row in rows {
        writer.write_record(row).context("Failed to write CSV row")?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// One line per order, joined to the ordering client's profile.
///
/// Orders reference their client through `client_id` (the profile `id`).
/// Orders whose client no longer exists keep empty client columns.
pub fn export_sales(orders: &[Value], clients: &[Value]) -> Result<String> {
    let by_id: HashMap<String, &Value> = clients
        .iter()
        .filter_map(|c| Some((cell_text(c.get("id")?), c)))
        .collect();

    let rows = orders.iter().map(|order| {
        let client = order
            .get("client_id")
            .map(cell_text)
            .and_then(|id| by_id.get(&id).copied());
        let client_name = client
            .map(|c| {
                format!("{} {}", text(c, "prenom"), text(c, "nom"))
                    .trim()
                    .to_string()
            })
            .unwrap_or_default();

        vec![
            text(order, "id"),
            text(order, "created_at").chars().take(10).collect(),
            client_name,
            client.map(|c| text(c, "email")).unwrap_or_default(),
            client.map(|c| text(c, "code_client")).unwrap_or_default(),
            text(order, "total"),
            text(order, "status"),
        ]
    });

    bom_csv(&SALES_HEADER, rows, QuoteStyle::Always)
}

/// One line per profile with the `client` role.
pub fn export_clients(profiles: &[Value]) -> Result<String> {
    let rows = profiles
        .iter()
        .filter(|p| {
            let role = text(p, "role");
            role.is_empty() || role == "client"
        })
        .map(|p| {
            vec![
                text(p, "code_client"),
                text(p, "prenom"),
                text(p, "nom"),
                text(p, "email"),
                text(p, "telephone"),
                text(p, "whatsapp"),
                text(p, "date_naissance"),
                text(p, "adresse"),
            ]
        });

    bom_csv(&CLIENTS_HEADER, rows, QuoteStyle::Always)
}

fn text(row: &Value, column: &str) -> String {
    row.get(column).map(cell_text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_export_filename() {
        assert_eq!(
            export_filename(ExportKind::Sales, "2026-10-17"),
            "sales_export_2026-10-17.csv"
        );
        assert_eq!("Clients".parse::<ExportKind>().unwrap(), ExportKind::Clients);
        assert!("stock".parse::<ExportKind>().is_err());
    }

    #[test]
    fn test_export_clients_quotes_every_field() {
        let profiles = vec![
            json!({"code_client": "C1", "prenom": "Awa", "nom": "Diop", "email": "awa@example.com",
                   "telephone": null, "adresse": "12, rue Carnot", "role": "client"}),
            json!({"code_client": "C2", "prenom": "Admin", "nom": "", "role": "admin"}),
        ];

        let csv = export_clients(&profiles).unwrap();
        assert!(csv.starts_with('\u{feff}'));
        let lines: Vec<&str> = csv.trim_start_matches('\u{feff}').lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("\"Code client\",\"Prénom\""));
        assert_eq!(
            lines[1],
            r#""C1","Awa","Diop","awa@example.com","","","","12, rue Carnot""#
        );
    }

    #[test]
    fn test_export_sales_joins_client() {
        let clients = vec![json!({"id": "u1", "prenom": "Awa", "nom": "Diop", "email": "awa@example.com", "code_client": "C1"})];
        let orders = vec![
            json!({"id": "o1", "created_at": "2026-10-01T09:30:00Z", "client_id": "u1", "total": 59.8, "status": "livree"}),
            json!({"id": "o2", "created_at": "2026-10-02T10:00:00Z", "client_id": "gone", "total": "19.90", "status": "en_attente"}),
        ];

        let csv = export_sales(&orders, &clients).unwrap();
        let lines: Vec<&str> = csv.trim_start_matches('\u{feff}').lines().collect();
        assert_eq!(
            lines[1],
            r#""o1","2026-10-01","Awa Diop","awa@example.com","C1","59.8","livree""#
        );
        assert_eq!(
            lines[2],
            r#""o2","2026-10-02","","","","19.90","en_attente""#
        );
    }
}
