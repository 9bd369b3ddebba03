//! Canonical import records and run outcome.
//!
//! Rows leave the header mapping stage as one of these typed records; nothing
//! downstream of the materializer sees a loosely keyed dictionary.

use crate::error::ImportError;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

pub const PRODUCTS_TABLE: &str = "products";
pub const VARIANTS_TABLE: &str = "product_variants";
pub const USERS_TABLE: &str = "profiles";
pub const ORDERS_TABLE: &str = "orders";

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u128 {
    u128::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Current UTC date as `YYYY-MM-DD`.
pub fn today_iso() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// The three kinds of bulk import an operator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Products,
    Users,
    Restock,
}

impl ImportKind {
    pub const ALL: [ImportKind; 3] = [ImportKind::Products, ImportKind::Users, ImportKind::Restock];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Products => "products",
            ImportKind::Users => "users",
            ImportKind::Restock => "restock",
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportKind {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "products" => Ok(ImportKind::Products),
            "users" => Ok(ImportKind::Users),
            "restock" => Ok(ImportKind::Restock),
            other => Err(ImportError::UnknownKind(other.to_string())),
        }
    }
}

/// Bottle sizes sold for every fragrance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Size {
    #[serde(rename = "15ml")]
    Ml15,
    #[serde(rename = "30ml")]
    Ml30,
    #[serde(rename = "50ml")]
    Ml50,
}

impl Size {
    pub const ALL: [Size; 3] = [Size::Ml15, Size::Ml30, Size::Ml50];

    pub fn as_str(&self) -> &'static str {
        match self {
            Size::Ml15 => "15ml",
            Size::Ml30 => "30ml",
            Size::Ml50 => "50ml",
        }
    }

    /// Catalog price used when a file does not supply one.
    pub fn default_price(&self) -> Decimal {
        match self {
            Size::Ml15 => Decimal::new(1990, 2),
            Size::Ml30 => Decimal::new(2990, 2),
            Size::Ml50 => Decimal::new(4490, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub size: Size,
    pub price: Decimal,
    pub stock: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub code_article: String,
    pub name: String,
    pub nom_parfum_inspire: String,
    pub marque_inspire: String,
    pub genre: String,
    pub saison: String,
    pub famille_olfactive: String,
    pub note_tete: Vec<String>,
    pub note_coeur: Vec<String>,
    pub note_fond: Vec<String>,
    pub description: String,
    pub image_url: String,
    pub variants: Vec<Variant>,
}

impl ProductRecord {
    /// Row body for the products table (variants are written separately).
    pub fn to_row(&self) -> Value {
        json!({
            "code_article": self.code_article,
            "name": self.name,
            "nom_parfum_inspire": self.nom_parfum_inspire,
            "marque_inspire": self.marque_inspire,
            "genre": self.genre,
            "saison": self.saison,
            "famille_olfactive": self.famille_olfactive,
            "note_tete": self.note_tete,
            "note_coeur": self.note_coeur,
            "note_fond": self.note_fond,
            "description": self.description,
            "image_url": self.image_url,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Conseillere,
    Admin,
}

impl Role {
    /// Lenient parse of a role cell. Unknown values fall back to `Client`.
    pub fn from_cell(cell: &str) -> Self {
        match cell.trim().to_lowercase().as_str() {
            "conseillere" | "conseillère" | "advisor" | "conseiller" => Role::Conseillere,
            "admin" | "administrateur" | "administratrice" | "administrator" => Role::Admin,
            _ => Role::Client,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Conseillere => "conseillere",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Lower-cased; empty when the file has no address for this user.
    pub email: String,
    pub prenom: String,
    pub nom: String,
    pub role: Role,
    pub telephone: Option<String>,
    pub whatsapp: Option<String>,
    pub date_naissance: Option<String>,
    pub adresse: Option<String>,
    pub code_client: String,
    /// The file had no client code and one was generated for this run.
    pub code_client_generated: bool,
}

impl UserRecord {
    /// The column that identifies this user remotely, with its value.
    pub fn key_column(&self) -> (&'static str, &str) {
        if self.email.is_empty() {
            ("code_client", &self.code_client)
        } else {
            ("email", &self.email)
        }
    }

    pub fn to_row(&self) -> Value {
        json!({
            "email": if self.email.is_empty() { Value::Null } else { json!(self.email) },
            "prenom": self.prenom,
            "nom": self.nom,
            "role": self.role.as_str(),
            "telephone": self.telephone,
            "whatsapp": self.whatsapp,
            "date_naissance": self.date_naissance,
            "adresse": self.adresse,
            "code_client": self.code_client,
        })
    }

    /// Patch body for an existing profile.
    ///
    /// Only columns the file actually supplied are sent, so a re-import never
    /// blanks an address or replaces a client code with a freshly generated one.
    pub fn to_patch(&self) -> Value {
        let mut patch = serde_json::Map::new();
        if let Value::Object(row) = self.to_row() {
            for (column, value) in row {
                let skip = match column.as_str() {
                    "email" => self.email.is_empty(),
                    "code_client" => self.code_client_generated,
                    "prenom" | "nom" => value.as_str().map_or(true, str::is_empty),
                    _ => value.is_null(),
                };
                if !skip {
                    patch.insert(column, value);
                }
            }
        }
        Value::Object(patch)
    }
}

/// Stock to add to existing variants of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockRecord {
    pub code_article: String,
    pub quantities: Vec<(Size, u32)>,
}

/// One materialized data row, tagged by import kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRecord {
    Product(ProductRecord),
    User(UserRecord),
    Restock(RestockRecord),
}

impl ImportRecord {
    /// The unique key used for reconciliation. Never empty.
    pub fn key(&self) -> &str {
        match self {
            ImportRecord::Product(p) => &p.code_article,
            ImportRecord::User(u) => u.key_column().1,
            ImportRecord::Restock(r) => &r.code_article,
        }
    }
}

/// Aggregate counters reported at the end of an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub added: usize,
    pub updated: usize,
    pub errors: usize,
    pub total_processed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_kind_parse() {
        assert_eq!("products".parse::<ImportKind>().unwrap(), ImportKind::Products);
        assert_eq!(" Users ".parse::<ImportKind>().unwrap(), ImportKind::Users);
        assert_eq!("restock".parse::<ImportKind>().unwrap(), ImportKind::Restock);
        // The legacy "stock" spelling is rejected rather than silently aliased
        assert!(matches!(
            "stock".parse::<ImportKind>(),
            Err(ImportError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_role_from_cell() {
        assert_eq!(Role::from_cell("Conseillère"), Role::Conseillere);
        assert_eq!(Role::from_cell("ADMIN"), Role::Admin);
        assert_eq!(Role::from_cell(""), Role::Client);
        assert_eq!(Role::from_cell("vip"), Role::Client);
    }

    #[test]
    fn test_user_key_falls_back_to_code_client() {
        let mut user = UserRecord {
            email: String::new(),
            prenom: "Awa".to_string(),
            nom: "Diop".to_string(),
            role: Role::Client,
            telephone: None,
            whatsapp: None,
            date_naissance: None,
            adresse: None,
            code_client: "C123456789".to_string(),
            code_client_generated: false,
        };
        assert_eq!(ImportRecord::User(user.clone()).key(), "C123456789");

        user.email = "awa@example.com".to_string();
        assert_eq!(user.key_column(), ("email", "awa@example.com"));
    }

    #[test]
    fn test_user_patch_skips_unsupplied_columns() {
        let user = UserRecord {
            email: "awa@example.com".to_string(),
            prenom: "Awa".to_string(),
            nom: String::new(),
            role: Role::Client,
            telephone: Some("+221 77 000 00 00".to_string()),
            whatsapp: None,
            date_naissance: None,
            adresse: None,
            code_client: "C000001042".to_string(),
            code_client_generated: true,
        };
        let patch = user.to_patch();
        assert_eq!(patch["email"], "awa@example.com");
        assert_eq!(patch["telephone"], "+221 77 000 00 00");
        assert_eq!(patch["role"], "client");
        assert!(patch.get("code_client").is_none());
        assert!(patch.get("nom").is_none());
        assert!(patch.get("adresse").is_none());
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = ImportOutcome {
            added: 1,
            updated: 2,
            errors: 0,
            total_processed: 3,
        };
        let value = serde_json::to_value(outcome).unwrap();
        assert_eq!(value["totalProcessed"], 3);
    }

    #[test]
    fn test_clock_helpers() {
        let today = today_iso();
        assert_eq!(today.len(), 10);
        assert_eq!(&today[4..5], "-");
        assert!(unix_millis() > 1_700_000_000_000);
    }
}
