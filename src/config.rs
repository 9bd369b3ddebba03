//! Import configuration.
//!
//! Column synonym profiles are loaded from the `configs/` directory when
//! present, layered over the built-in profiles. The in-memory store is backed
//! by `RwLock` so profiles can be replaced at runtime. Connection settings come
//! from the environment.

use crate::schema::ImportKind;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// How to find one canonical field among arbitrary file headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Canonical field name (e.g. `codeArticle`).
    pub name: String,
    /// Header spellings to try, in priority order.
    pub synonyms: Vec<String>,
    /// Primary descriptive field: a row where all of these default and every
    /// cell is empty is unparseable.
    #[serde(default)]
    pub primary: bool,
}

/// Header synonyms for one import kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProfile {
    pub kind: ImportKind,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl ImportProfile {
    pub fn primary_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.primary)
            .map(|f| f.name.as_str())
    }
}

/// In-memory store for import profiles.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    profiles: Arc<RwLock<HashMap<ImportKind, ImportProfile>>>,
}

impl ProfileStore {
    /// Store holding only the built-in profiles.
    pub fn builtin() -> Self {
        let profiles = ImportKind::ALL
            .iter()
            .map(|kind| (*kind, builtin_profile(*kind)))
            .collect();
        Self {
            profiles: Arc::new(RwLock::new(profiles)),
        }
    }

    /// Built-in profiles overridden by every `*.json` profile found in `dir`.
    ///
    /// A missing directory is not an error.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let store = Self::builtin();

        if !dir.exists() {
            info!("No profile directory at {:?}, using built-in profiles", dir);
            return Ok(store);
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read profile: {:?}", path))?;

                let profile: ImportProfile = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse profile: {:?}", path))?;

                if profile.fields.is_empty() {
                    anyhow::bail!("Profile {:?} declares no fields", path);
                }

                info!(
                    "Loaded {} profile ({} fields) from {:?}",
                    profile.kind,
                    profile.fields.len(),
                    path
                );
                store.insert(profile);
            }
        }

        Ok(store)
    }

    /// Get the profile for an import kind (returns clone).
    pub fn get(&self, kind: ImportKind) -> ImportProfile {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| builtin_profile(kind))
    }

    /// Insert or replace the profile for its kind.
    pub fn insert(&self, profile: ImportProfile) {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile.kind, profile);
    }

    pub fn all(&self) -> Vec<ImportProfile> {
        let mut all: Vec<ImportProfile> = self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|p| p.kind.as_str());
        all
    }
}

fn field(name: &str, synonyms: &[&str]) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        primary: false,
    }
}

fn primary(name: &str, synonyms: &[&str]) -> FieldSpec {
    FieldSpec {
        primary: true,
        ..field(name, synonyms)
    }
}

const CODE_ARTICLE: &[&str] = &[
    "code_produit",
    "code_article",
    "codeArticle",
    "reference",
    "ref",
    "sku",
    "code",
];

/// Synonym tables for the header spellings seen in supplier and CRM exports.
pub fn builtin_profile(kind: ImportKind) -> ImportProfile {
    match kind {
        ImportKind::Products => ImportProfile {
            kind,
            description: "Catalog products with their 15/30/50ml variants".to_string(),
            fields: vec![
                field("codeArticle", CODE_ARTICLE),
                primary("name", &["nom_lolly", "nom_produit", "name", "nom", "produit"]),
                primary(
                    "nomParfumInspire",
                    &["nom_parfum_inspire", "parfum_inspire", "inspire_de", "parfum inspiré", "inspiration"],
                ),
                primary("marqueInspire", &["marque_inspire", "marque", "brand"]),
                field("genre", &["genre", "gender", "sexe"]),
                field("saison", &["saison", "season"]),
                field("familleOlfactive", &["famille_olfactive", "famille", "olfactive"]),
                field("noteTete", &["note_tete", "notes_tete", "notes de tête", "top_notes"]),
                field("noteCoeur", &["note_coeur", "notes_coeur", "notes de cœur", "heart_notes"]),
                field("noteFond", &["note_fond", "notes_fond", "notes de fond", "base_notes"]),
                field("description", &["description", "desc"]),
                field("imageURL", &["image_url", "imageURL", "url_image", "image", "photo"]),
                field("prix15ml", &["prix_15ml", "prix 15ml", "price_15ml"]),
                field("stock15ml", &["stock_15ml", "stock 15ml", "qte_15ml"]),
                field("prix30ml", &["prix_30ml", "prix 30ml", "price_30ml"]),
                field("stock30ml", &["stock_30ml", "stock 30ml", "qte_30ml"]),
                field("prix50ml", &["prix_50ml", "prix 50ml", "price_50ml"]),
                field("stock50ml", &["stock_50ml", "stock 50ml", "qte_50ml"]),
            ],
        },
        ImportKind::Users => ImportProfile {
            kind,
            description: "Client, advisor and admin accounts".to_string(),
            fields: vec![
                primary("email", &["email", "e-mail", "mail", "courriel"]),
                primary("prenom", &["prenom", "prénom", "first_name", "firstname"]),
                primary("nom", &["nom", "nom_famille", "last_name", "lastname"]),
                field("role", &["role", "rôle", "type_compte", "statut"]),
                field("telephone", &["telephone", "téléphone", "tel", "phone", "mobile"]),
                field("whatsapp", &["whatsapp"]),
                field(
                    "dateNaissance",
                    &["date_naissance", "date de naissance", "naissance", "birthday", "date_of_birth"],
                ),
                field("adresse", &["adresse", "address"]),
                field("codeClient", &["code_client", "codeClient", "client_code", "numero_client"]),
            ],
        },
        ImportKind::Restock => ImportProfile {
            kind,
            description: "Quantities added to existing product variants".to_string(),
            fields: vec![
                primary("codeArticle", CODE_ARTICLE),
                field("quantite15ml", &["quantite_15ml", "qte_15ml", "quantity_15ml", "stock_15ml", "ajout_15ml"]),
                field("quantite30ml", &["quantite_30ml", "qte_30ml", "quantity_30ml", "stock_30ml", "ajout_30ml"]),
                field("quantite50ml", &["quantite_50ml", "qte_50ml", "quantity_50ml", "stock_50ml", "ajout_50ml"]),
            ],
        },
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub supabase_url: String,
    pub service_role_key: String,
    /// Key used for the auth endpoints; falls back to the service role key.
    pub anon_key: String,
    pub bind_addr: String,
    pub profiles_dir: String,
    /// Base delay between user insert attempts.
    pub retry_delay_ms: u64,
    /// Run imports against an in-memory store instead of Supabase.
    pub dry_run: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let dry_run = std::env::var("IMPORT_DRY_RUN")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        // Supabase credentials are only optional in dry-run mode
        let required = |name: &str| -> Result<String> {
            match std::env::var(name) {
                Ok(v) => Ok(v),
                Err(_) if dry_run => Ok(String::new()),
                Err(_) => Err(anyhow!("{name} not set")),
            }
        };
        let supabase_url = required("SUPABASE_URL")?.trim_end_matches('/').to_string();
        let service_role_key = required("SUPABASE_SERVICE_ROLE_KEY")?;
        let anon_key =
            std::env::var("SUPABASE_ANON_KEY").unwrap_or_else(|_| service_role_key.clone());

        let retry_delay_ms = match std::env::var("IMPORT_RETRY_DELAY_MS") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("IMPORT_RETRY_DELAY_MS is not a number: {v}"))?,
            Err(_) => 400,
        };

        Ok(Self {
            supabase_url,
            service_role_key,
            anon_key,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            profiles_dir: std::env::var("PROFILES_DIR").unwrap_or_else(|_| "configs".to_string()),
            retry_delay_ms,
            dry_run,
        })
    }
}
