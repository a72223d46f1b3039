//! Statement text for the relational backend. Everything here is pure: values
//! always travel as bind parameters, only identifiers and validated keywords are
//! spliced into the text.

use crate::descriptor::Attribute;
use crate::error::{Error, Result};
use crate::query::{Comparison, SortOrder};
use crate::schema::{IndexConfig, IndexType};
use crate::value::Type;
use crate::vector::Distance;

pub const DESCRIPTOR_ID: &str = "descriptorid";
pub const RETRIEVABLE_ID: &str = "retrievableid";
pub const RETRIEVABLE_TYPE: &str = "type";
pub const SUBJECT_ID: &str = "subjectid";
pub const PREDICATE: &str = "predicate";
pub const OBJECT_ID: &str = "objectid";

pub const DISTANCE_ALIAS: &str = "_distance";
pub const SCORE_ALIAS: &str = "_score";

pub const INDEX_TYPE_PARAMETER: &str = "type";
pub const DISTANCE_PARAMETER: &str = "distance";
pub const LANGUAGE_PARAMETER: &str = "language";
pub const DEFAULT_LANGUAGE: &str = "english";

pub const CREATE_EXTENSION: &str = "CREATE EXTENSION IF NOT EXISTS vector";

/// Bind parameters a single statement may carry.
pub const MAX_PARAMETERS: usize = 65_535;

pub const PAGE_SIZE: usize = 1_000;

pub fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A keyword-like option taken from configuration (index method, text-search language).
fn keyword<'a>(parameter: &str, value: &'a str) -> Result<&'a str> {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(value)
    } else {
        Err(Error::InvalidParameter {
            name: parameter.to_string(),
            value: value.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub schema: String,
    pub name: String,
}

impl Table {
    pub fn descriptor(schema: &str, field: &str) -> Self {
        Self {
            schema: schema.to_lowercase(),
            name: format!("descriptor_{}", field.to_lowercase()),
        }
    }

    pub fn retrievable(schema: &str) -> Self {
        Self {
            schema: schema.to_lowercase(),
            name: "retrievable".to_string(),
        }
    }

    pub fn relationships(schema: &str) -> Self {
        Self {
            schema: schema.to_lowercase(),
            name: "relationships".to_string(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", ident(&self.schema), ident(&self.name))
    }

    /// Dotted name used in logs and errors.
    pub fn entity(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

pub fn sql_type(ty: &Type) -> String {
    match *ty {
        Type::Boolean => "BOOLEAN".into(),
        Type::Byte | Type::Short => "SMALLINT".into(),
        Type::Int => "INTEGER".into(),
        Type::Long => "BIGINT".into(),
        Type::Float => "REAL".into(),
        Type::Double => "DOUBLE PRECISION".into(),
        Type::String => "VARCHAR".into(),
        Type::Text => "TEXT".into(),
        Type::DateTime => "TIMESTAMPTZ".into(),
        Type::Uuid => "UUID".into(),
        // vector(0) and bit(0) do not exist; empty vectors live in plain arrays.
        Type::BooleanVector(0) => "BOOLEAN[]".into(),
        Type::FloatVector(0) => "REAL[]".into(),
        Type::BooleanVector(n) => format!("BIT({n})"),
        Type::FloatVector(n) => format!("VECTOR({n})"),
        Type::IntVector(_) => "INTEGER[]".into(),
        Type::LongVector(_) => "BIGINT[]".into(),
        Type::DoubleVector(_) => "DOUBLE PRECISION[]".into(),
    }
}

/// Bind placeholder `$n` for a value of type `ty`. Float vectors are bound as
/// text and cast, numeric arrays and scalars bind natively.
pub fn placeholder(ty: &Type, n: usize) -> String {
    match ty {
        Type::FloatVector(d) if *d > 0 => format!("${n}::text::vector"),
        _ => format!("${n}"),
    }
}

/// Column as it appears in a select list.
fn output(attribute: &Attribute) -> String {
    match attribute.ty {
        Type::FloatVector(d) if d > 0 => format!("{0}::text AS {0}", ident(&attribute.name)),
        _ => ident(&attribute.name),
    }
}

pub fn fulltext_column(attribute: &str) -> String {
    format!("{attribute}_ft_index")
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA {}", ident(&schema.to_lowercase()))
}

pub fn create_retrievable(schema: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({RETRIEVABLE_ID} UUID PRIMARY KEY, {} VARCHAR(100))",
        Table::retrievable(schema).qualified(),
        ident(RETRIEVABLE_TYPE)
    )
}

pub fn create_relationships(schema: &str) -> String {
    let retrievable = Table::retrievable(schema).qualified();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         {SUBJECT_ID} UUID NOT NULL REFERENCES {retrievable} ({RETRIEVABLE_ID}) ON DELETE CASCADE, \
         {PREDICATE} VARCHAR(100) NOT NULL, \
         {OBJECT_ID} UUID NOT NULL REFERENCES {retrievable} ({RETRIEVABLE_ID}) ON DELETE CASCADE, \
         PRIMARY KEY ({SUBJECT_ID}, {PREDICATE}, {OBJECT_ID}))",
        Table::relationships(schema).qualified()
    )
}

/// Full-text columns of a field: `(attribute, language)` for every textual
/// attribute carrying a full-text index.
pub fn fulltext_columns(layout: &[Attribute], indexes: &[IndexConfig]) -> Result<Vec<(String, String)>> {
    let mut columns = Vec::new();
    for index in indexes.iter().filter(|i| i.index_type == IndexType::Fulltext) {
        let language = keyword(LANGUAGE_PARAMETER, index.parameters.get_or(LANGUAGE_PARAMETER, DEFAULT_LANGUAGE))?;
        for name in &index.attributes {
            let attribute = find(layout, name)?;
            if !attribute.ty.is_textual() {
                return Err(Error::Unsupported(format!("full-text index on non-textual attribute '{name}'")));
            }
            columns.push((name.clone(), language.to_lowercase()));
        }
    }
    Ok(columns)
}

fn find<'a>(layout: &'a [Attribute], name: &str) -> Result<&'a Attribute> {
    layout
        .iter()
        .find(|a| a.name == name)
        .ok_or_else(|| Error::Layout(format!("cannot index '{name}': no such attribute")))
}

pub fn create_descriptor(
    table: &Table,
    layout: &[Attribute],
    fulltext: &[(String, String)],
) -> Result<String> {
    let retrievable = Table::retrievable(&table.schema).qualified();
    let mut columns = vec![
        format!("{DESCRIPTOR_ID} UUID PRIMARY KEY"),
        format!("{RETRIEVABLE_ID} UUID NOT NULL REFERENCES {retrievable} ({RETRIEVABLE_ID}) ON DELETE CASCADE"),
    ];
    for attribute in layout {
        if attribute.name == DESCRIPTOR_ID || attribute.name == RETRIEVABLE_ID {
            return Err(Error::Layout(format!("attribute name '{}' is reserved", attribute.name)));
        }
        let null = if attribute.nullable { "" } else { " NOT NULL" };
        columns.push(format!("{} {}{null}", ident(&attribute.name), sql_type(&attribute.ty)));
    }
    for (attribute, language) in fulltext {
        columns.push(format!(
            "{} TSVECTOR GENERATED ALWAYS AS (to_tsvector('{language}', coalesce({}, ''))) STORED",
            ident(&fulltext_column(attribute)),
            ident(attribute)
        ));
    }
    Ok(format!("CREATE TABLE IF NOT EXISTS {} ({})", table.qualified(), columns.join(", ")))
}

fn parse_distance(name: &str) -> Option<Distance> {
    [
        Distance::Euclidean,
        Distance::Manhattan,
        Distance::Cosine,
        Distance::Hamming,
        Distance::Jaccard,
    ]
    .into_iter()
    .find(|d| d.name().eq_ignore_ascii_case(name))
}

fn operator_class(ty: &Type, distance: Distance) -> Result<&'static str> {
    match (ty, distance) {
        (Type::FloatVector(0) | Type::BooleanVector(0), _) => Err(Error::Unsupported(format!(
            "nearest-neighbour index on {ty}"
        ))),
        (Type::FloatVector(_), Distance::Euclidean) => Ok("vector_l2_ops"),
        (Type::FloatVector(_), Distance::Manhattan) => Ok("vector_l1_ops"),
        (Type::FloatVector(_), Distance::Cosine) => Ok("vector_cosine_ops"),
        (Type::BooleanVector(_), Distance::Hamming) => Ok("bit_hamming_ops"),
        (Type::BooleanVector(_), Distance::Jaccard) => Ok("bit_jaccard_ops"),
        _ => Err(Error::Unsupported(format!(
            "nearest-neighbour index with {} distance on {ty}",
            distance.name()
        ))),
    }
}

/// Secondary indexes declared by the field, including the GIN index behind
/// every full-text column.
pub fn create_indexes(table: &Table, layout: &[Attribute], indexes: &[IndexConfig]) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for index in indexes {
        for name in &index.attributes {
            let attribute = find(layout, name)?;
            let statement = match index.index_type {
                IndexType::Scalar => {
                    let method = keyword(INDEX_TYPE_PARAMETER, index.parameters.get_or(INDEX_TYPE_PARAMETER, "btree"))?;
                    format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {} USING {} ({})",
                        ident(&format!("{}_{name}_idx", table.name)),
                        table.qualified(),
                        method.to_lowercase(),
                        ident(name)
                    )
                }
                IndexType::Fulltext => format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} USING gin ({})",
                    ident(&format!("{}_{name}_ft", table.name)),
                    table.qualified(),
                    ident(&fulltext_column(name))
                ),
                IndexType::Nns => {
                    let method = keyword(INDEX_TYPE_PARAMETER, index.parameters.get_or(INDEX_TYPE_PARAMETER, "hnsw"))?;
                    let default = match attribute.ty {
                        Type::BooleanVector(_) => Distance::Hamming,
                        _ => Distance::Euclidean,
                    };
                    let distance = match index.parameters.get(DISTANCE_PARAMETER) {
                        Some(raw) => parse_distance(raw).ok_or_else(|| Error::InvalidParameter {
                            name: DISTANCE_PARAMETER.to_string(),
                            value: raw.to_string(),
                        })?,
                        None => default,
                    };
                    format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {} USING {} ({} {})",
                        ident(&format!("{}_{name}_nns", table.name)),
                        table.qualified(),
                        method.to_lowercase(),
                        ident(name),
                        operator_class(&attribute.ty, distance)?
                    )
                }
            };
            statements.push(statement);
        }
    }
    Ok(statements)
}

pub fn drop_table(table: &Table) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", table.qualified())
}

pub fn truncate(table: &Table) -> String {
    format!("TRUNCATE {} CASCADE", table.qualified())
}

/// `$1` schema, `$2` table.
pub const TABLE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                                WHERE table_schema = $1 AND table_name = $2)";

pub fn count(table: &Table) -> String {
    format!("SELECT COUNT(*) FROM {}", table.qualified())
}

// --- descriptors ---

fn descriptor_list(layout: &[Attribute], values: bool) -> String {
    let mut list = vec![DESCRIPTOR_ID.to_string(), RETRIEVABLE_ID.to_string()];
    if values {
        list.extend(layout.iter().map(output));
    }
    list.join(", ")
}

/// How many descriptor rows fit into one insert statement.
pub fn rows_per_insert(layout: &[Attribute]) -> usize {
    (MAX_PARAMETERS / (layout.len() + 2)).max(1)
}

pub fn insert_descriptors(table: &Table, layout: &[Attribute], rows: usize) -> String {
    let width = layout.len() + 2;
    let mut columns = vec![DESCRIPTOR_ID.to_string(), RETRIEVABLE_ID.to_string()];
    columns.extend(layout.iter().map(|a| ident(&a.name)));
    let groups: Vec<String> = (0..rows)
        .map(|row| {
            let base = row * width;
            let mut slots = vec![format!("${}", base + 1), format!("${}", base + 2)];
            slots.extend(
                layout
                    .iter()
                    .enumerate()
                    .map(|(i, a)| placeholder(&a.ty, base + 3 + i)),
            );
            format!("({})", slots.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.qualified(),
        columns.join(", "),
        groups.join(", ")
    )
}

/// `$1` descriptor id, `$2` owner, then one parameter per attribute.
pub fn update_descriptor(table: &Table, layout: &[Attribute]) -> String {
    let mut assignments = vec![format!("{RETRIEVABLE_ID} = $2")];
    assignments.extend(
        layout
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{} = {}", ident(&a.name), placeholder(&a.ty, i + 3))),
    );
    format!(
        "UPDATE {} SET {} WHERE {DESCRIPTOR_ID} = $1",
        table.qualified(),
        assignments.join(", ")
    )
}

/// `$1` array of descriptor ids.
pub fn delete_descriptors(table: &Table) -> String {
    format!("DELETE FROM {} WHERE {DESCRIPTOR_ID} = ANY($1)", table.qualified())
}

/// Descriptors whose `column` is in the array bound to `$1`.
pub fn select_descriptors_in(table: &Table, layout: &[Attribute], column: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ANY($1)",
        descriptor_list(layout, true),
        table.qualified(),
        ident(column)
    )
}

/// One keyset page ordered by descriptor id; with `after`, `$1` is the last id seen.
pub fn page_descriptors(table: &Table, layout: &[Attribute], after: bool) -> String {
    let filter = if after {
        format!(" WHERE {DESCRIPTOR_ID} > $1")
    } else {
        String::new()
    };
    format!(
        "SELECT {} FROM {}{filter} ORDER BY {DESCRIPTOR_ID} LIMIT {PAGE_SIZE}",
        descriptor_list(layout, true),
        table.qualified()
    )
}

/// Distance between `attribute` and the query bound to `$1`. Numeric queries
/// bind as `float8[]`, bit queries as `bit`.
pub fn distance_expression(attribute: &Attribute, distance: Distance) -> Result<String> {
    let column = ident(&attribute.name);
    let unsupported = || Error::Unsupported(format!("{} distance on {}", distance.name(), attribute.ty));
    match attribute.ty {
        Type::BooleanVector(0) | Type::FloatVector(0) => Err(unsupported()),
        Type::BooleanVector(_) => match distance {
            Distance::Hamming => Ok(format!("({column} <~> $1)")),
            Distance::Jaccard => Ok(format!(
                "(CASE WHEN bit_count({column} | $1) = 0 THEN 0.0::float8 ELSE ({column} <%> $1) END)"
            )),
            _ => Err(unsupported()),
        },
        Type::FloatVector(_) | Type::IntVector(_) | Type::LongVector(_) | Type::DoubleVector(_) => {
            let (vector, array) = match attribute.ty {
                Type::FloatVector(_) => (column.clone(), format!("{column}::real[]::float8[]")),
                _ => (format!("{column}::float8[]::vector"), format!("{column}::float8[]")),
            };
            let query = "$1::float8[]::vector";
            match distance {
                Distance::Euclidean => Ok(format!("({vector} <-> {query})")),
                Distance::Manhattan => Ok(format!("({vector} <+> {query})")),
                Distance::Cosine => Ok(format!(
                    "coalesce(nullif({vector} <=> {query}, 'NaN'::float8), 1.0::float8)"
                )),
                Distance::Hamming => Ok(format!(
                    "(SELECT COUNT(*) FROM unnest({array}, $1::float8[]) AS d(a, b) WHERE a <> b)::float8"
                )),
                Distance::Jaccard => Err(unsupported()),
            }
        }
        _ => Err(unsupported()),
    }
}

/// k nearest rows to `$1`. Without `values` only the id columns are returned.
pub fn proximity(
    table: &Table,
    layout: &[Attribute],
    attribute: &Attribute,
    distance: Distance,
    order: SortOrder,
    k: usize,
    values: bool,
) -> Result<String> {
    let direction = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    Ok(format!(
        "SELECT {}, {} AS {} FROM {} WHERE {} IS NOT NULL ORDER BY {} {direction}, {DESCRIPTOR_ID} LIMIT {k}",
        descriptor_list(layout, values),
        distance_expression(attribute, distance)?,
        ident(DISTANCE_ALIAS),
        table.qualified(),
        ident(&attribute.name),
        ident(DISTANCE_ALIAS)
    ))
}

/// One comparison clause whose literals start at `$first`.
pub fn condition(attribute: &Attribute, comparison: Comparison, values: usize, first: usize) -> String {
    let column = ident(&attribute.name);
    let slot = |n: usize| placeholder(&attribute.ty, n);
    let operator = match comparison {
        Comparison::Equal => "=",
        Comparison::NotEqual => "<>",
        Comparison::Less => "<",
        Comparison::Greater => ">",
        Comparison::LessOrEqual => "<=",
        Comparison::GreaterOrEqual => ">=",
        Comparison::Like => "LIKE",
        Comparison::In => {
            let slots: Vec<String> = (first..first + values).map(slot).collect();
            return format!("{column} IN ({})", slots.join(", "));
        }
    };
    format!("{column} {operator} {}", slot(first))
}

pub fn select_where(
    table: &Table,
    layout: &[Attribute],
    conditions: &[String],
    limit: Option<usize>,
    values: bool,
) -> String {
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {DESCRIPTOR_ID}",
        descriptor_list(layout, values),
        table.qualified(),
        conditions.join(" AND ")
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

/// Ranked full-text match of the plain query text bound to `$1`.
pub fn fulltext(
    table: &Table,
    layout: &[Attribute],
    attribute: &str,
    language: &str,
    limit: Option<usize>,
    values: bool,
) -> Result<String> {
    let language = keyword(LANGUAGE_PARAMETER, language)?;
    let vector = ident(&fulltext_column(attribute));
    let query = format!("plainto_tsquery('{language}', $1)");
    let mut sql = format!(
        "SELECT {}, ts_rank({vector}, {query})::float8 AS {} FROM {} WHERE {vector} @@ {query} \
         ORDER BY {} DESC, {DESCRIPTOR_ID}",
        descriptor_list(layout, values),
        ident(SCORE_ALIAS),
        table.qualified(),
        ident(SCORE_ALIAS)
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(sql)
}

// --- retrievables ---

pub fn insert_retrievables(schema: &str, rows: usize) -> String {
    let groups: Vec<String> = (0..rows).map(|i| format!("(${}, ${})", 2 * i + 1, 2 * i + 2)).collect();
    format!(
        "INSERT INTO {} ({RETRIEVABLE_ID}, {}) VALUES {}",
        Table::retrievable(schema).qualified(),
        ident(RETRIEVABLE_TYPE),
        groups.join(", ")
    )
}

/// `$1` id, `$2` type.
pub fn update_retrievable(schema: &str) -> String {
    format!(
        "UPDATE {} SET {} = $2 WHERE {RETRIEVABLE_ID} = $1",
        Table::retrievable(schema).qualified(),
        ident(RETRIEVABLE_TYPE)
    )
}

/// `$1` array of ids. Relationships and descriptors go with them.
pub fn delete_retrievables(schema: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {RETRIEVABLE_ID} = ANY($1)",
        Table::retrievable(schema).qualified()
    )
}

pub fn select_retrievables_in(schema: &str) -> String {
    format!(
        "SELECT {RETRIEVABLE_ID}, {} FROM {} WHERE {RETRIEVABLE_ID} = ANY($1)",
        ident(RETRIEVABLE_TYPE),
        Table::retrievable(schema).qualified()
    )
}

pub fn page_retrievables(schema: &str, after: bool) -> String {
    let filter = if after {
        format!(" WHERE {RETRIEVABLE_ID} > $1")
    } else {
        String::new()
    };
    format!(
        "SELECT {RETRIEVABLE_ID}, {} FROM {}{filter} ORDER BY {RETRIEVABLE_ID} LIMIT {PAGE_SIZE}",
        ident(RETRIEVABLE_TYPE),
        Table::retrievable(schema).qualified()
    )
}

pub fn insert_relationships(schema: &str, rows: usize) -> String {
    let groups: Vec<String> = (0..rows)
        .map(|i| format!("(${}, ${}, ${})", 3 * i + 1, 3 * i + 2, 3 * i + 3))
        .collect();
    format!(
        "INSERT INTO {} ({SUBJECT_ID}, {PREDICATE}, {OBJECT_ID}) VALUES {}",
        Table::relationships(schema).qualified(),
        groups.join(", ")
    )
}

pub fn delete_relationships(schema: &str, rows: usize) -> String {
    let groups: Vec<String> = (0..rows)
        .map(|i| format!("(${}, ${}, ${})", 3 * i + 1, 3 * i + 2, 3 * i + 3))
        .collect();
    format!(
        "DELETE FROM {} WHERE ({SUBJECT_ID}, {PREDICATE}, {OBJECT_ID}) IN ({})",
        Table::relationships(schema).qualified(),
        groups.join(", ")
    )
}

/// `$1` subjects, `$2` predicates, `$3` objects; an empty array matches everything.
pub fn select_relationships(schema: &str) -> String {
    format!(
        "SELECT {SUBJECT_ID}, {PREDICATE}, {OBJECT_ID} FROM {} \
         WHERE (cardinality($1::uuid[]) = 0 OR {SUBJECT_ID} = ANY($1)) \
         AND (cardinality($2::varchar[]) = 0 OR {PREDICATE} = ANY($2)) \
         AND (cardinality($3::uuid[]) = 0 OR {OBJECT_ID} = ANY($3))",
        Table::relationships(schema).qualified()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;

    fn layout() -> Vec<Attribute> {
        vec![
            Attribute::new("label", Type::String, false),
            Attribute::new("embedding", Type::FloatVector(3), true),
        ]
    }

    #[test]
    fn test_tables_are_lowercased_and_quoted() {
        let table = Table::descriptor("Media", "AverageColor");
        assert_eq!(table.qualified(), "\"media\".\"descriptor_averagecolor\"");
        assert_eq!(table.entity(), "media.descriptor_averagecolor");
        assert_eq!(ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(sql_type(&Type::FloatVector(512)), "VECTOR(512)");
        assert_eq!(sql_type(&Type::BooleanVector(64)), "BIT(64)");
        assert_eq!(sql_type(&Type::Byte), "SMALLINT");
        assert_eq!(sql_type(&Type::DateTime), "TIMESTAMPTZ");
        assert_eq!(sql_type(&Type::FloatVector(0)), "REAL[]");
        assert_eq!(sql_type(&Type::BooleanVector(0)), "BOOLEAN[]");
        assert_eq!(placeholder(&Type::FloatVector(0), 3), "$3");
        assert_eq!(placeholder(&Type::FloatVector(2), 3), "$3::text::vector");
        let empty = Attribute::new("v", Type::FloatVector(0), false);
        assert_eq!(output(&empty), "\"v\"");
        assert!(matches!(distance_expression(&empty, Distance::Euclidean), Err(Error::Unsupported(_))));
        assert!(matches!(operator_class(&Type::BooleanVector(0), Distance::Hamming), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_create_descriptor_table() {
        let table = Table::descriptor("media", "label");
        let fulltext = vec![("label".to_string(), "english".to_string())];
        let ddl = create_descriptor(&table, &layout(), &fulltext).unwrap();
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"media\".\"descriptor_label\" ("));
        assert!(ddl.contains("descriptorid UUID PRIMARY KEY"));
        assert!(ddl.contains("REFERENCES \"media\".\"retrievable\" (retrievableid) ON DELETE CASCADE"));
        assert!(ddl.contains("\"label\" VARCHAR NOT NULL"));
        assert!(ddl.contains("\"embedding\" VECTOR(3)"));
        assert!(!ddl.contains("\"embedding\" VECTOR(3) NOT NULL"));
        assert!(ddl.contains("to_tsvector('english', coalesce(\"label\", ''))"));

        let reserved = vec![Attribute::new("descriptorid", Type::Uuid, false)];
        assert!(matches!(create_descriptor(&table, &reserved, &[]), Err(Error::Layout(_))));
    }

    #[test]
    fn test_indexes() {
        let table = Table::descriptor("media", "label");
        let indexes = vec![
            IndexConfig::new(IndexType::Scalar, "label"),
            IndexConfig::new(IndexType::Nns, "embedding")
                .with_parameters(Parameters::new().with(DISTANCE_PARAMETER, "cosine")),
            IndexConfig::new(IndexType::Fulltext, "label"),
        ];
        let statements = create_indexes(&table, &layout(), &indexes).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].ends_with("USING btree (\"label\")"));
        assert!(statements[1].ends_with("USING hnsw (\"embedding\" vector_cosine_ops)"));
        assert!(statements[2].ends_with("USING gin (\"label_ft_index\")"));

        let hostile = vec![IndexConfig::new(IndexType::Scalar, "label")
            .with_parameters(Parameters::new().with(INDEX_TYPE_PARAMETER, "btree; DROP TABLE x"))];
        assert!(matches!(create_indexes(&table, &layout(), &hostile), Err(Error::InvalidParameter { .. })));

        let jaccard = vec![IndexConfig::new(IndexType::Nns, "embedding")
            .with_parameters(Parameters::new().with(DISTANCE_PARAMETER, "JACCARD"))];
        assert!(matches!(create_indexes(&table, &layout(), &jaccard), Err(Error::Unsupported(_))));

        let text = fulltext_columns(&layout(), &indexes).unwrap();
        assert_eq!(text, vec![("label".to_string(), "english".to_string())]);
    }

    #[test]
    fn test_insert_numbers_parameters_per_row() {
        let sql = insert_descriptors(&Table::descriptor("media", "label"), &layout(), 2);
        assert!(sql.ends_with("VALUES ($1, $2, $3, $4::text::vector), ($5, $6, $7, $8::text::vector)"));
        assert_eq!(rows_per_insert(&layout()), MAX_PARAMETERS / 4);
    }

    #[test]
    fn test_update_and_delete() {
        let table = Table::descriptor("media", "label");
        assert_eq!(
            update_descriptor(&table, &layout()),
            "UPDATE \"media\".\"descriptor_label\" SET retrievableid = $2, \"label\" = $3, \
             \"embedding\" = $4::text::vector WHERE descriptorid = $1"
        );
        assert_eq!(
            delete_descriptors(&table),
            "DELETE FROM \"media\".\"descriptor_label\" WHERE descriptorid = ANY($1)"
        );
    }

    #[test]
    fn test_vectors_are_read_as_text() {
        let sql = page_descriptors(&Table::descriptor("media", "label"), &layout(), true);
        assert!(sql.contains("\"embedding\"::text AS \"embedding\""));
        assert!(sql.contains("WHERE descriptorid > $1 ORDER BY descriptorid LIMIT 1000"));
    }

    #[test]
    fn test_distance_operators() {
        let float = Attribute::new("v", Type::FloatVector(4), false);
        assert_eq!(
            distance_expression(&float, Distance::Euclidean).unwrap(),
            "(\"v\" <-> $1::float8[]::vector)"
        );
        assert!(distance_expression(&float, Distance::Manhattan).unwrap().contains("<+>"));
        assert!(distance_expression(&float, Distance::Cosine).unwrap().contains("<=>"));
        assert!(distance_expression(&float, Distance::Jaccard).is_err());

        let long = Attribute::new("v", Type::LongVector(4), false);
        assert!(distance_expression(&long, Distance::Euclidean)
            .unwrap()
            .contains("\"v\"::float8[]::vector <->"));
        assert!(distance_expression(&long, Distance::Hamming).unwrap().contains("unnest"));

        let bits = Attribute::new("v", Type::BooleanVector(8), false);
        assert_eq!(distance_expression(&bits, Distance::Hamming).unwrap(), "(\"v\" <~> $1)");
        assert!(distance_expression(&bits, Distance::Jaccard).unwrap().contains("<%>"));
        assert!(distance_expression(&bits, Distance::Cosine).is_err());
    }

    #[test]
    fn test_proximity_statement() {
        let layout = layout();
        let sql = proximity(
            &Table::descriptor("media", "label"),
            &layout,
            &layout[1],
            Distance::Euclidean,
            SortOrder::Desc,
            5,
            false,
        )
        .unwrap();
        assert!(sql.starts_with("SELECT descriptorid, retrievableid, (\"embedding\" <-> $1::float8[]::vector) AS \"_distance\""));
        assert!(sql.ends_with("WHERE \"embedding\" IS NOT NULL ORDER BY \"_distance\" DESC, descriptorid LIMIT 5"));
    }

    #[test]
    fn test_conditions() {
        let label = Attribute::new("label", Type::String, false);
        assert_eq!(condition(&label, Comparison::Equal, 1, 1), "\"label\" = $1");
        assert_eq!(condition(&label, Comparison::Like, 1, 2), "\"label\" LIKE $2");
        assert_eq!(condition(&label, Comparison::In, 3, 2), "\"label\" IN ($2, $3, $4)");

        let sql = select_where(
            &Table::descriptor("media", "label"),
            &[label.clone()],
            &["\"label\" = $1".to_string(), "\"label\" <> $2".to_string()],
            Some(10),
            true,
        );
        assert!(sql.ends_with("WHERE \"label\" = $1 AND \"label\" <> $2 ORDER BY descriptorid LIMIT 10"));
    }

    #[test]
    fn test_fulltext_statement() {
        let sql = fulltext(&Table::descriptor("media", "caption"), &[], "value", "english", Some(3), true).unwrap();
        assert!(sql.contains("ts_rank(\"value_ft_index\", plainto_tsquery('english', $1))::float8 AS \"_score\""));
        assert!(sql.contains("WHERE \"value_ft_index\" @@ plainto_tsquery('english', $1)"));
        assert!(sql.ends_with("ORDER BY \"_score\" DESC, descriptorid LIMIT 3"));
        assert!(fulltext(&Table::descriptor("media", "caption"), &[], "value", "en'glish", None, true).is_err());
    }

    #[test]
    fn test_relationship_statements() {
        assert_eq!(
            delete_relationships("media", 2),
            "DELETE FROM \"media\".\"relationships\" WHERE (subjectid, predicate, objectid) IN (($1, $2, $3), ($4, $5, $6))"
        );
        assert!(create_relationships("media").contains("PRIMARY KEY (subjectid, predicate, objectid)"));
        assert!(select_relationships("media").contains("cardinality($2::varchar[]) = 0"));
        assert_eq!(
            insert_retrievables("media", 2),
            "INSERT INTO \"media\".\"retrievable\" (retrievableid, \"type\") VALUES ($1, $2), ($3, $4)"
        );
    }
}
