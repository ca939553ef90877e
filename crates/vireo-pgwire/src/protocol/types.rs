//! PostgreSQL data-type registry
//!
//! Static OID table matching `pg_type`, plus the name → OID mapping used
//! when deriving RowDescription fields from a backend schema. Size -1 means
//! variable length, -2 a null-terminated C string. Types in the text set
//! default to text format on the wire; everything else defaults to binary.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Wire format of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFormat {
    Text = 0,
    Binary = 1,
}

/// One entry of the data-type registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgType {
    pub oid: i32,
    pub name: &'static str,
    pub size: i16,
    pub default_format: PgFormat,
}

use PgFormat::{Binary, Text};

/// The static registry. Matches PostgreSQL's `pg_type` OIDs for base types,
/// pseudo-types, and the catalog relations drivers probe during connection
/// setup. Never mutated at runtime.
pub static PG_TYPES: &[PgType] = &[
    PgType { oid: 16, name: "bool", size: 1, default_format: Text },
    PgType { oid: 17, name: "bytea", size: -1, default_format: Binary },
    PgType { oid: 18, name: "char", size: 1, default_format: Binary },
    PgType { oid: 19, name: "name", size: 64, default_format: Text },
    PgType { oid: 20, name: "int8", size: 8, default_format: Text },
    PgType { oid: 21, name: "int2", size: 2, default_format: Text },
    PgType { oid: 22, name: "int2vector", size: -1, default_format: Binary },
    PgType { oid: 23, name: "int4", size: 4, default_format: Text },
    PgType { oid: 24, name: "regproc", size: 4, default_format: Binary },
    PgType { oid: 25, name: "text", size: -1, default_format: Text },
    PgType { oid: 26, name: "oid", size: 4, default_format: Binary },
    PgType { oid: 27, name: "tid", size: 6, default_format: Binary },
    PgType { oid: 28, name: "xid", size: 4, default_format: Binary },
    PgType { oid: 29, name: "cid", size: 4, default_format: Binary },
    PgType { oid: 30, name: "oidvector", size: -1, default_format: Binary },
    PgType { oid: 71, name: "pg_type", size: -1, default_format: Binary },
    PgType { oid: 75, name: "pg_attribute", size: -1, default_format: Binary },
    PgType { oid: 81, name: "pg_proc", size: -1, default_format: Binary },
    PgType { oid: 83, name: "pg_class", size: -1, default_format: Binary },
    PgType { oid: 114, name: "json", size: -1, default_format: Binary },
    PgType { oid: 142, name: "xml", size: -1, default_format: Binary },
    PgType { oid: 194, name: "pg_node_tree", size: -1, default_format: Binary },
    PgType { oid: 600, name: "point", size: 16, default_format: Binary },
    PgType { oid: 601, name: "lseg", size: 32, default_format: Binary },
    PgType { oid: 602, name: "path", size: -1, default_format: Binary },
    PgType { oid: 603, name: "box", size: 32, default_format: Binary },
    PgType { oid: 604, name: "polygon", size: -1, default_format: Binary },
    PgType { oid: 628, name: "line", size: 24, default_format: Binary },
    PgType { oid: 650, name: "cidr", size: -1, default_format: Binary },
    PgType { oid: 700, name: "float4", size: 4, default_format: Text },
    PgType { oid: 701, name: "float8", size: 8, default_format: Text },
    PgType { oid: 705, name: "unknown", size: -2, default_format: Binary },
    PgType { oid: 718, name: "circle", size: 24, default_format: Binary },
    PgType { oid: 790, name: "money", size: 8, default_format: Binary },
    PgType { oid: 829, name: "macaddr", size: 6, default_format: Binary },
    PgType { oid: 869, name: "inet", size: -1, default_format: Binary },
    PgType { oid: 1000, name: "_bool", size: -1, default_format: Binary },
    PgType { oid: 1001, name: "_bytea", size: -1, default_format: Binary },
    PgType { oid: 1005, name: "_int2", size: -1, default_format: Binary },
    PgType { oid: 1007, name: "_int4", size: -1, default_format: Binary },
    PgType { oid: 1009, name: "_text", size: -1, default_format: Binary },
    PgType { oid: 1014, name: "_bpchar", size: -1, default_format: Binary },
    PgType { oid: 1015, name: "_varchar", size: -1, default_format: Binary },
    PgType { oid: 1016, name: "_int8", size: -1, default_format: Binary },
    PgType { oid: 1021, name: "_float4", size: -1, default_format: Binary },
    PgType { oid: 1022, name: "_float8", size: -1, default_format: Binary },
    PgType { oid: 1042, name: "bpchar", size: -1, default_format: Text },
    PgType { oid: 1043, name: "varchar", size: -1, default_format: Text },
    PgType { oid: 1082, name: "date", size: 4, default_format: Text },
    PgType { oid: 1083, name: "time", size: 8, default_format: Text },
    PgType { oid: 1114, name: "timestamp", size: 8, default_format: Text },
    PgType { oid: 1184, name: "timestamptz", size: 8, default_format: Binary },
    PgType { oid: 1186, name: "interval", size: 16, default_format: Binary },
    PgType { oid: 1266, name: "timetz", size: 12, default_format: Binary },
    PgType { oid: 1560, name: "bit", size: -1, default_format: Binary },
    PgType { oid: 1562, name: "varbit", size: -1, default_format: Binary },
    PgType { oid: 1700, name: "numeric", size: -1, default_format: Binary },
    PgType { oid: 1790, name: "refcursor", size: -1, default_format: Binary },
    PgType { oid: 2202, name: "regprocedure", size: 4, default_format: Binary },
    PgType { oid: 2203, name: "regoper", size: 4, default_format: Binary },
    PgType { oid: 2205, name: "regclass", size: 4, default_format: Binary },
    PgType { oid: 2206, name: "regtype", size: 4, default_format: Binary },
    PgType { oid: 2249, name: "record", size: -1, default_format: Binary },
    PgType { oid: 2275, name: "cstring", size: -2, default_format: Binary },
    PgType { oid: 2276, name: "any", size: 4, default_format: Binary },
    PgType { oid: 2277, name: "anyarray", size: -1, default_format: Binary },
    PgType { oid: 2278, name: "void", size: 4, default_format: Binary },
    PgType { oid: 2279, name: "trigger", size: 4, default_format: Binary },
    PgType { oid: 2281, name: "internal", size: 8, default_format: Binary },
    PgType { oid: 2283, name: "anyelement", size: 4, default_format: Binary },
    PgType { oid: 2776, name: "anynonarray", size: 4, default_format: Binary },
    PgType { oid: 2950, name: "uuid", size: 16, default_format: Binary },
    PgType { oid: 3500, name: "anyenum", size: 4, default_format: Binary },
    PgType { oid: 3614, name: "tsvector", size: -1, default_format: Binary },
    PgType { oid: 3615, name: "tsquery", size: -1, default_format: Binary },
    PgType { oid: 3734, name: "regconfig", size: 4, default_format: Binary },
    PgType { oid: 3769, name: "regdictionary", size: 4, default_format: Binary },
    PgType { oid: 3802, name: "jsonb", size: -1, default_format: Binary },
    PgType { oid: 3904, name: "int4range", size: -1, default_format: Binary },
    PgType { oid: 3906, name: "numrange", size: -1, default_format: Binary },
    PgType { oid: 3908, name: "tsrange", size: -1, default_format: Binary },
    PgType { oid: 3910, name: "tstzrange", size: -1, default_format: Binary },
    PgType { oid: 3912, name: "daterange", size: -1, default_format: Binary },
    PgType { oid: 3926, name: "int8range", size: -1, default_format: Binary },
];

static BY_OID: Lazy<HashMap<i32, &'static PgType>> =
    Lazy::new(|| PG_TYPES.iter().map(|t| (t.oid, t)).collect());

static BY_NAME: Lazy<HashMap<&'static str, &'static PgType>> =
    Lazy::new(|| PG_TYPES.iter().map(|t| (t.name, t)).collect());

/// Look up a type by OID.
pub fn by_oid(oid: i32) -> Option<&'static PgType> {
    BY_OID.get(&oid).copied()
}

/// Look up a type by its canonical pg_type name.
pub fn by_name(name: &str) -> Option<&'static PgType> {
    BY_NAME.get(name).copied()
}

/// Get the OID for a schema type name, accepting the aliases backends and
/// SQL text use (`integer`, `bigint`, `double precision`, …). Unknown names
/// map to `text`.
pub fn oid_of(type_name: &str) -> i32 {
    canonical(type_name).oid
}

/// Get the wire size for a schema type name.
pub fn size_of(type_name: &str) -> i16 {
    canonical(type_name).size
}

static TEXT_FALLBACK: PgType = PgType {
    oid: 25,
    name: "text",
    size: -1,
    default_format: Text,
};

fn canonical(type_name: &str) -> &'static PgType {
    let name = type_name.to_lowercase();
    let canonical_name = match name.as_str() {
        "int2" | "smallint" => "int2",
        "int4" | "integer" | "int" | "serial" => "int4",
        "int8" | "bigint" | "bigserial" => "int8",
        "float4" | "real" => "float4",
        "float8" | "double" | "double precision" => "float8",
        "decimal" | "numeric" => "numeric",
        "bool" | "boolean" => "bool",
        "varchar" | "character varying" => "varchar",
        "bpchar" | "character" => "bpchar",
        "timestamp" | "datetime" | "timestamp without time zone" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "time" | "time without time zone" => "time",
        "timetz" | "time with time zone" => "timetz",
        other => other,
    };
    by_name(canonical_name).unwrap_or(&TEXT_FALLBACK)
}
