//! Relational tables and their flat-file line format
//!
//! Each staged row is one line of `;`-separated fields in the table's column
//! order. Hashes, ids, addresses and byte strings are lowercase hex, numbers
//! are decimal and timestamps are RFC 3339. An empty field is NULL.

use chrono::SecondsFormat;
use rusqlite::types::Value;

use crate::core::{Address, BlockRecord, HashDigest, TransactionRecord};
use crate::rich::references::{
    BlockReference, IndexRows, SignerReference, TxReference, UpdatedAddressReference,
};

// =============================================================================
// Schema
// =============================================================================

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "block" (
    "index" INTEGER NOT NULL,
    "hash" TEXT PRIMARY KEY,
    "pre_evaluation_hash" TEXT NOT NULL,
    "state_root_hash" TEXT,
    "difficulty" INTEGER NOT NULL,
    "total_difficulty" INTEGER NOT NULL,
    "nonce" TEXT,
    "miner" TEXT,
    "previous_hash" TEXT,
    "timestamp" TEXT NOT NULL,
    "tx_hash" TEXT,
    "protocol_version" INTEGER NOT NULL,
    "tx_count" INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS "idx_block_index" ON "block" ("index");
CREATE INDEX IF NOT EXISTS "idx_block_miner" ON "block" ("miner", "index");

CREATE TABLE IF NOT EXISTS "transaction" (
    "tx_id" TEXT PRIMARY KEY,
    "nonce" INTEGER NOT NULL,
    "signer" TEXT NOT NULL,
    "signature" TEXT,
    "timestamp" TEXT NOT NULL,
    "public_key" TEXT,
    "genesis_hash" TEXT,
    "bytes_length" INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS "tx_references" (
    "tx_id" TEXT PRIMARY KEY,
    "block_hash" TEXT NOT NULL,
    "tx_nonce" INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS "idx_tx_references_nonce" ON "tx_references" ("tx_nonce", "tx_id");
CREATE INDEX IF NOT EXISTS "idx_tx_references_block" ON "tx_references" ("block_hash");

CREATE TABLE IF NOT EXISTS "signer_references" (
    "signer" TEXT NOT NULL,
    "tx_id" TEXT NOT NULL,
    "tx_nonce" INTEGER NOT NULL,
    PRIMARY KEY ("signer", "tx_id")
);
CREATE INDEX IF NOT EXISTS "idx_signer_references_nonce" ON "signer_references" ("tx_nonce", "signer", "tx_id");
CREATE INDEX IF NOT EXISTS "idx_signer_references_signer_nonce" ON "signer_references" ("signer", "tx_nonce", "tx_id");

CREATE TABLE IF NOT EXISTS "updated_address_references" (
    "updated_address" TEXT NOT NULL,
    "tx_id" TEXT NOT NULL,
    "tx_nonce" INTEGER NOT NULL,
    PRIMARY KEY ("updated_address", "tx_id")
);
CREATE INDEX IF NOT EXISTS "idx_updated_address_references_nonce" ON "updated_address_references" ("tx_nonce", "updated_address", "tx_id");
CREATE INDEX IF NOT EXISTS "idx_updated_address_references_address_nonce" ON "updated_address_references" ("updated_address", "tx_nonce", "tx_id");
"#;

// =============================================================================
// Tables
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    /// Hex of exactly this many bytes
    FixedHex(usize),
    /// Hex of any length
    Bytes,
    Timestamp,
}

const HASH: ColumnKind = ColumnKind::FixedHex(HashDigest::LEN);
const ADDRESS: ColumnKind = ColumnKind::FixedHex(Address::LEN);

#[derive(Debug, Clone, Copy)]
struct Column {
    name: &'static str,
    kind: ColumnKind,
    nullable: bool,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        nullable: false,
    }
}

const fn opt(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        nullable: true,
    }
}

const BLOCK_COLUMNS: &[Column] = &[
    col("index", ColumnKind::Integer),
    col("hash", HASH),
    col("pre_evaluation_hash", HASH),
    opt("state_root_hash", HASH),
    col("difficulty", ColumnKind::Integer),
    col("total_difficulty", ColumnKind::Integer),
    opt("nonce", ColumnKind::Bytes),
    opt("miner", ADDRESS),
    opt("previous_hash", HASH),
    col("timestamp", ColumnKind::Timestamp),
    opt("tx_hash", HASH),
    col("protocol_version", ColumnKind::Integer),
    col("tx_count", ColumnKind::Integer),
];

const TRANSACTION_COLUMNS: &[Column] = &[
    col("tx_id", HASH),
    col("nonce", ColumnKind::Integer),
    col("signer", ADDRESS),
    opt("signature", ColumnKind::Bytes),
    col("timestamp", ColumnKind::Timestamp),
    opt("public_key", ColumnKind::Bytes),
    opt("genesis_hash", HASH),
    col("bytes_length", ColumnKind::Integer),
];

const TX_REFERENCE_COLUMNS: &[Column] = &[
    col("tx_id", HASH),
    col("block_hash", HASH),
    col("tx_nonce", ColumnKind::Integer),
];

const SIGNER_REFERENCE_COLUMNS: &[Column] = &[
    col("signer", ADDRESS),
    col("tx_id", HASH),
    col("tx_nonce", ColumnKind::Integer),
];

const UPDATED_ADDRESS_REFERENCE_COLUMNS: &[Column] = &[
    col("updated_address", ADDRESS),
    col("tx_id", HASH),
    col("tx_nonce", ColumnKind::Integer),
];

/// One of the five bulk-loaded tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Transaction,
    TxReferences,
    SignerReferences,
    UpdatedAddressReferences,
    Block,
}

impl Table {
    /// Load order: block rows go last so a visible block implies its references
    pub const LOAD_ORDER: [Table; 5] = [
        Table::Transaction,
        Table::TxReferences,
        Table::SignerReferences,
        Table::UpdatedAddressReferences,
        Table::Block,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Block => "block",
            Table::Transaction => "transaction",
            Table::TxReferences => "tx_references",
            Table::SignerReferences => "signer_references",
            Table::UpdatedAddressReferences => "updated_address_references",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::LOAD_ORDER.into_iter().find(|t| t.name() == name)
    }

    fn columns(self) -> &'static [Column] {
        match self {
            Table::Block => BLOCK_COLUMNS,
            Table::Transaction => TRANSACTION_COLUMNS,
            Table::TxReferences => TX_REFERENCE_COLUMNS,
            Table::SignerReferences => SIGNER_REFERENCE_COLUMNS,
            Table::UpdatedAddressReferences => UPDATED_ADDRESS_REFERENCE_COLUMNS,
        }
    }

    pub fn column_count(self) -> usize {
        self.columns().len()
    }

    /// Header row written by the export tool
    pub fn header(self) -> String {
        self.columns()
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// `INSERT OR REPLACE` statement taking one parameter per column
    pub fn upsert_sql(self) -> String {
        let columns = self.columns();
        let names = columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT OR REPLACE INTO \"{}\" ({}) VALUES ({})",
            self.name(),
            names,
            placeholders
        )
    }

    /// Parse one staged line into bindable values
    pub fn parse_line(self, line: &str) -> Result<Vec<Value>, String> {
        let fields: Vec<&str> = line.split(';').collect();
        let columns = self.columns();
        if fields.len() != columns.len() {
            return Err(format!(
                "expected {} fields, found {}",
                columns.len(),
                fields.len()
            ));
        }

        columns
            .iter()
            .zip(fields)
            .map(|(column, field)| parse_field(column, field))
            .collect()
    }
}

fn parse_field(column: &Column, field: &str) -> Result<Value, String> {
    if field.is_empty() {
        return if column.nullable {
            Ok(Value::Null)
        } else {
            Err(format!("{}: missing value", column.name))
        };
    }
    match column.kind {
        ColumnKind::Integer => field
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| format!("{}: {}", column.name, e)),
        ColumnKind::FixedHex(len) => {
            let bytes = hex::decode(field).map_err(|e| format!("{}: {}", column.name, e))?;
            if bytes.len() != len {
                return Err(format!(
                    "{}: expected {} bytes, got {}",
                    column.name,
                    len,
                    bytes.len()
                ));
            }
            Ok(Value::Text(field.to_lowercase()))
        }
        ColumnKind::Bytes => hex::decode(field)
            .map(|_| Value::Text(field.to_lowercase()))
            .map_err(|e| format!("{}: {}", column.name, e)),
        ColumnKind::Timestamp => chrono::DateTime::parse_from_rfc3339(field)
            .map(|_| Value::Text(field.to_string()))
            .map_err(|e| format!("{}: {}", column.name, e)),
    }
}

// =============================================================================
// Line Encoding
// =============================================================================

fn opt_hex<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn timestamp(value: &chrono::DateTime<chrono::Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn block_line(block: &BlockRecord) -> String {
    let h = &block.header;
    [
        h.index.to_string(),
        h.hash.to_hex(),
        h.pre_evaluation_hash.to_hex(),
        opt_hex(&h.state_root_hash),
        h.difficulty.to_string(),
        h.total_difficulty.to_string(),
        hex::encode(&h.nonce),
        opt_hex(&h.miner),
        opt_hex(&h.previous_hash),
        timestamp(&h.timestamp),
        opt_hex(&h.tx_hash),
        h.protocol_version.to_string(),
        block.transactions.len().to_string(),
    ]
    .join(";")
}

pub fn transaction_line(tx: &TransactionRecord) -> String {
    [
        tx.id.to_hex(),
        tx.nonce.to_string(),
        tx.signer.to_hex(),
        hex::encode(&tx.signature),
        timestamp(&tx.timestamp),
        hex::encode(&tx.public_key),
        opt_hex::<HashDigest>(&tx.genesis_hash),
        tx.size.to_string(),
    ]
    .join(";")
}

pub fn tx_reference_line(r: &TxReference) -> String {
    format!("{};{};{}", r.tx_id, r.block_hash, r.tx_nonce)
}

pub fn signer_reference_line(r: &SignerReference) -> String {
    format!("{};{};{}", r.signer, r.tx_id, r.tx_nonce)
}

pub fn updated_address_reference_line(r: &UpdatedAddressReference) -> String {
    format!("{};{};{}", r.updated_address, r.tx_id, r.tx_nonce)
}

/// Every staged line produced by indexing a block or a lone transaction
pub fn index_lines(
    block: Option<&BlockRecord>,
    transactions: &[&TransactionRecord],
    rows: &IndexRows,
) -> Vec<(Table, String)> {
    let mut lines = Vec::with_capacity(rows.len() + transactions.len() + 1);
    lines.extend(
        transactions
            .iter()
            .map(|tx| (Table::Transaction, transaction_line(tx))),
    );
    lines.extend(
        rows.tx_references
            .iter()
            .map(|r| (Table::TxReferences, tx_reference_line(r))),
    );
    lines.extend(
        rows.signer_references
            .iter()
            .map(|r| (Table::SignerReferences, signer_reference_line(r))),
    );
    lines.extend(
        rows.updated_address_references
            .iter()
            .map(|r| (Table::UpdatedAddressReferences, updated_address_reference_line(r))),
    );
    if let Some(block) = block {
        lines.push((Table::Block, block_line(block)));
    }
    lines
}

/// Column list selected when reading block listing rows
pub const BLOCK_REFERENCE_SELECT: &str = r#""hash", "index", "miner", "tx_count""#;

/// Rebuild a block listing row from its selected columns
pub fn block_reference_from_columns(
    hash: &str,
    index: i64,
    miner: Option<&str>,
    tx_count: i64,
) -> Result<BlockReference, crate::core::IdentifierError> {
    Ok(BlockReference {
        hash: hash.parse()?,
        index,
        miner: miner.map(str::parse).transpose()?,
        tx_count: tx_count.max(0) as u32,
    })
}
