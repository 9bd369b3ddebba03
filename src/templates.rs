//! Downloadable CSV templates, one per import kind.

use crate::export::bom_csv;
use crate::schema::ImportKind;
use anyhow::Result;
use csv::QuoteStyle;

const PRODUCT_HEADER: &[&str] = &[
    "code_produit",
    "nom_lolly",
    "nom_parfum_inspire",
    "marque_inspire",
    "genre",
    "saison",
    "famille_olfactive",
    "note_tete",
    "note_coeur",
    "note_fond",
    "description",
    "image_url",
    "prix_15ml",
    "stock_15ml",
    "prix_30ml",
    "stock_30ml",
    "prix_50ml",
    "stock_50ml",
];

const PRODUCT_ROWS: &[&[&str]] = &[
    &[
        "L001",
        "Nuit Étoilée",
        "Black Opium",
        "Yves Saint Laurent",
        "femme",
        "hiver",
        "Orientale vanillée",
        "poivre rose, poire",
        "café, jasmin",
        "vanille, patchouli",
        "Sillage chaud et gourmand",
        "",
        "19.90",
        "10",
        "29.90",
        "8",
        "44.90",
        "5",
    ],
    &[
        "L002",
        "Brise Marine",
        "Acqua di Giò",
        "Giorgio Armani",
        "homme",
        "été",
        "Aromatique aquatique",
        "bergamote, citron",
        "notes marines, romarin",
        "cèdre, musc",
        "",
        "",
        "19.90",
        "12",
        "29.90",
        "6",
        "44.90",
        "0",
    ],
];

const USER_HEADER: &[&str] = &[
    "email",
    "prenom",
    "nom",
    "role",
    "telephone",
    "whatsapp",
    "date_naissance",
    "adresse",
    "code_client",
];

const USER_ROWS: &[&[&str]] = &[
    &[
        "awa.diop@example.com",
        "Awa",
        "Diop",
        "client",
        "+221 77 123 45 67",
        "+221 77 123 45 67",
        "15/03/1990",
        "Dakar, Plateau",
        "",
    ],
    &[
        "fatou.sow@example.com",
        "Fatou",
        "Sow",
        "conseillere",
        "+221 76 555 12 34",
        "",
        "1988-11-02",
        "",
        "",
    ],
];

const RESTOCK_HEADER: &[&str] = &["code_article", "quantite_15ml", "quantite_30ml", "quantite_50ml"];

const RESTOCK_ROWS: &[&[&str]] = &[&["L001", "10", "5", "0"], &["L002", "0", "12", "4"]];

/// BOM-prefixed CSV template for `kind`: the header row the importer
/// recognizes exactly, followed by example rows.
pub fn template(kind: ImportKind) -> Result<String> {
    let (header, rows) = match kind {
        ImportKind::Products => (PRODUCT_HEADER, PRODUCT_ROWS),
        ImportKind::Users => (USER_HEADER, USER_ROWS),
        ImportKind::Restock => (RESTOCK_HEADER, RESTOCK_ROWS),
    };
    bom_csv(header, rows.iter().copied(), QuoteStyle::Necessary)
}

pub fn template_filename(kind: ImportKind) -> String {
    format!("template_{}.csv", kind)
}
