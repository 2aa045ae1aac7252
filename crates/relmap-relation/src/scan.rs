//! Scanning RETURNING rows back into in-memory items.
//!
//! A [`ScanPlan`] is compiled once per upsert from the declared
//! [`ReturnProp`]s and a sample item. Compilation checks every declared kind
//! against the item's current field so wiring mistakes fail before any
//! statement runs; applying the plan converts one row into field updates and
//! merges them into the item.

use relmap_core::record::{Object, from_object, json_kind, merge_fields, to_object};
use relmap_core::{Error, Result, Row, ShapeError, ShapeErrorKind, TypeError, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

/// How a returned column is stored into its item field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Text,
    Int,
    Float,
    Bool,
    /// A chrono timestamp string, zoned or naive to suit the field.
    Timestamp,
    /// Any JSON value; text columns are parsed.
    Json,
    /// A JSON object deserialized into a nested record field.
    Nested,
}

impl ScanKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Text => "text",
            ScanKind::Int => "integer",
            ScanKind::Float => "float",
            ScanKind::Bool => "bool",
            ScanKind::Timestamp => "timestamp",
            ScanKind::Json => "json",
            ScanKind::Nested => "nested record",
        }
    }

    /// Whether a field currently holding `current` can receive this kind.
    fn accepts(self, current: &Json) -> bool {
        match (self, current) {
            (_, Json::Null) | (ScanKind::Json, _) => true,
            (ScanKind::Text, Json::String(_)) => true,
            (ScanKind::Int, Json::Number(n)) => n.is_i64() || n.is_u64(),
            (ScanKind::Float, Json::Number(_)) => true,
            (ScanKind::Bool, Json::Bool(_)) => true,
            (ScanKind::Timestamp, Json::String(_) | Json::Number(_)) => true,
            (ScanKind::Nested, Json::Object(_)) => true,
            _ => false,
        }
    }

    /// Values tried for NULL when the field takes neither `null` nor a
    /// declared default.
    fn zero(self) -> Vec<Json> {
        match self {
            ScanKind::Text => vec![Json::String(String::new())],
            ScanKind::Int => vec![Json::from(0)],
            ScanKind::Float => vec![Json::from(0.0)],
            ScanKind::Bool => vec![Json::Bool(false)],
            // Zoned, naive, then date-only.
            ScanKind::Timestamp => vec![
                Json::String("1970-01-01T00:00:00Z".to_string()),
                Json::String("1970-01-01T00:00:00".to_string()),
                Json::String("1970-01-01".to_string()),
            ],
            ScanKind::Json => vec![Json::Null],
            ScanKind::Nested => Vec::new(),
        }
    }
}

/// One returned column and the item field it lands in.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnProp {
    pub column: String,
    pub field: String,
    pub kind: ScanKind,
    /// Written instead of the zero value when the column is NULL.
    pub default: Option<Json>,
}

impl ReturnProp {
    /// Column `column` scanned into the field of the same name.
    pub fn new(column: impl Into<String>, kind: ScanKind) -> Self {
        let column = column.into();
        Self {
            field: column.clone(),
            column,
            kind,
            default: None,
        }
    }

    pub fn text(column: impl Into<String>) -> Self {
        Self::new(column, ScanKind::Text)
    }

    pub fn int(column: impl Into<String>) -> Self {
        Self::new(column, ScanKind::Int)
    }

    pub fn float(column: impl Into<String>) -> Self {
        Self::new(column, ScanKind::Float)
    }

    pub fn bool(column: impl Into<String>) -> Self {
        Self::new(column, ScanKind::Bool)
    }

    pub fn timestamp(column: impl Into<String>) -> Self {
        Self::new(column, ScanKind::Timestamp)
    }

    pub fn json(column: impl Into<String>) -> Self {
        Self::new(column, ScanKind::Json)
    }

    pub fn nested(column: impl Into<String>) -> Self {
        Self::new(column, ScanKind::Nested)
    }

    /// Store into a differently named field.
    pub fn into_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn default_value(mut self, default: impl Into<Json>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone)]
struct ScanStep {
    column: String,
    field: String,
    kind: ScanKind,
    default: Option<Json>,
}

/// Compiled per-field scan instructions.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    steps: Vec<ScanStep>,
}

impl ScanPlan {
    /// Compile `props` against the fields of `sample`.
    ///
    /// Only the declared kinds are checked here. Whether a field takes NULL
    /// is decided per target when the plan is applied.
    #[allow(clippy::result_large_err)]
    pub fn compile<T: Serialize>(props: &[ReturnProp], sample: &T) -> Result<Self> {
        let object = to_object(sample)?;
        let mut steps = Vec::with_capacity(props.len());
        for prop in props {
            if let Some(current) = object.get(&prop.field) {
                if !prop.kind.accepts(current) {
                    return Err(unsupported(
                        &prop.field,
                        format!(
                            "cannot store {} column '{}' in a {} field",
                            prop.kind.as_str(),
                            prop.column,
                            json_kind(current)
                        ),
                    ));
                }
            }
            steps.push(ScanStep {
                column: prop.column.clone(),
                field: prop.field.clone(),
                kind: prop.kind,
                default: prop.default.clone(),
            });
        }
        Ok(Self { steps })
    }

    /// Columns the plan reads, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.column.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Write `row` into `target`.
    ///
    /// A NULL column becomes `null` when the target field takes it, then the
    /// declared default, then the kind's zero value; if none fits the field
    /// is left alone. Either every field is written or `target` is left
    /// unchanged.
    #[allow(clippy::result_large_err)]
    pub fn apply<T>(&self, row: &Row, target: &mut T) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let current = to_object(target)?;
        let mut updates = Object::new();
        for step in &self.steps {
            let value = row.get_by_name(&step.column).ok_or_else(|| {
                Error::Shape(
                    ShapeError::new(
                        ShapeErrorKind::MissingField,
                        format!("returned row has no column '{}'", step.column),
                    )
                    .with_field(&step.field),
                )
            })?;
            let mut candidates = step.candidates(value)?;
            let chosen = if candidates.len() == 1 && !value.is_null() {
                candidates.pop()
            } else {
                match candidates
                    .iter()
                    .position(|c| fits::<T>(&current, &step.field, c))
                {
                    Some(i) => Some(candidates.swap_remove(i)),
                    // The merge below reports the first rendering as unsupported.
                    None if !value.is_null() => candidates.into_iter().next(),
                    None => None,
                }
            };
            if let Some(json) = chosen {
                updates.insert(step.field.clone(), json);
            }
        }

        let fields: Vec<String> = updates.keys().cloned().collect();
        merge_fields(target, updates).map_err(|e| match e {
            Error::Serde(message) => unsupported(&fields.join(", "), message),
            other => other,
        })
    }
}

/// Whether `T` still deserializes with `field` set to `candidate`.
fn fits<T: DeserializeOwned>(current: &Object, field: &str, candidate: &Json) -> bool {
    let mut object = current.clone();
    object.insert(field.to_string(), candidate.clone());
    from_object::<T>(object).is_ok()
}

impl ScanStep {
    /// Renderings of `value` for this field, most preferred first.
    #[allow(clippy::result_large_err)]
    fn candidates(&self, value: &Value) -> Result<Vec<Json>> {
        if value.is_null() {
            let mut out = vec![Json::Null];
            out.extend(self.default.clone());
            out.extend(self.kind.zero());
            return Ok(out);
        }

        let json = match self.kind {
            ScanKind::Text => match value.as_str() {
                Some(s) => Json::String(s.to_string()),
                None => match value.to_json() {
                    Json::String(s) => Json::String(s),
                    other => Json::String(other.to_string()),
                },
            },
            ScanKind::Int => Json::from(value.as_i64().ok_or_else(|| self.mismatch(value))?),
            ScanKind::Float => {
                let f = value.as_f64().ok_or_else(|| self.mismatch(value))?;
                serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number)
            }
            ScanKind::Bool => Json::Bool(value.as_bool().ok_or_else(|| self.mismatch(value))?),
            ScanKind::Timestamp => match value {
                // Offered in both shapes so naive and zoned fields accept either column type.
                Value::TimestampTz(micros) => {
                    return Ok(vec![value.to_json(), Value::Timestamp(*micros).to_json()]);
                }
                Value::Timestamp(micros) => {
                    return Ok(vec![value.to_json(), Value::TimestampTz(*micros).to_json()]);
                }
                Value::Date(_) | Value::Text(_) => value.to_json(),
                _ => return Err(self.mismatch(value)),
            },
            ScanKind::Json | ScanKind::Nested => match value {
                Value::Text(s) => serde_json::from_str(s)?,
                other => other.to_json(),
            },
        };

        if self.kind == ScanKind::Nested && !json.is_object() {
            return Err(unsupported(
                &self.field,
                format!(
                    "column '{}' returned {} for a nested record",
                    self.column,
                    json_kind(&json)
                ),
            ));
        }
        Ok(vec![json])
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::Type(TypeError {
            expected: self.kind.as_str(),
            actual: value.type_name().to_string(),
            column: Some(self.column.clone()),
            rust_type: None,
        })
    }
}

fn unsupported(field: &str, message: String) -> Error {
    Error::Shape(ShapeError::new(ShapeErrorKind::UnsupportedFieldKind, message).with_field(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Dims {
        w: i64,
        h: i64,
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Line {
        id: Option<i64>,
        sku: String,
        qty: i64,
        price: f64,
        active: bool,
        note: Option<String>,
        created_at: String,
        meta: Json,
        dims: Dims,
    }

    fn props() -> Vec<ReturnProp> {
        vec![
            ReturnProp::int("id"),
            ReturnProp::text("sku"),
            ReturnProp::int("qty").default_value(1),
            ReturnProp::float("price"),
            ReturnProp::bool("active"),
            ReturnProp::text("note"),
            ReturnProp::timestamp("created_at"),
            ReturnProp::json("meta"),
            ReturnProp::nested("dims"),
        ]
    }

    #[test]
    fn scans_every_kind() {
        let mut line = Line::default();
        let plan = ScanPlan::compile(&props(), &line).unwrap();
        let row = Row::from_pairs([
            ("id", Value::BigInt(11)),
            ("sku", Value::from("A-1")),
            ("qty", Value::Int(4)),
            ("price", Value::Double(2.5)),
            ("active", Value::Bool(true)),
            ("note", Value::from("fragile")),
            ("created_at", Value::TimestampTz(0)),
            ("meta", Value::from(r#"{"color":"red"}"#)),
            ("dims", Value::Json(json!({"w": 3, "h": 4}))),
        ]);
        plan.apply(&row, &mut line).unwrap();
        assert_eq!(line.id, Some(11));
        assert_eq!(line.sku, "A-1");
        assert_eq!(line.qty, 4);
        assert!((line.price - 2.5).abs() < f64::EPSILON);
        assert!(line.active);
        assert_eq!(line.note.as_deref(), Some("fragile"));
        assert!(line.created_at.starts_with("1970-01-01T00:00:00"));
        assert_eq!(line.meta, json!({"color": "red"}));
        assert_eq!(line.dims, Dims { w: 3, h: 4 });
    }

    #[test]
    fn nulls_use_default_then_zero() {
        let mut line = Line {
            sku: "old".into(),
            qty: 9,
            dims: Dims { w: 1, h: 1 },
            ..Line::default()
        };
        let plan = ScanPlan::compile(&props(), &line).unwrap();
        let row = Row::from_pairs([
            ("id", Value::Null),
            ("sku", Value::Null),
            ("qty", Value::Null),
            ("price", Value::Null),
            ("active", Value::Null),
            ("note", Value::Null),
            ("created_at", Value::Null),
            ("meta", Value::Null),
            ("dims", Value::Null),
        ]);
        plan.apply(&row, &mut line).unwrap();
        assert_eq!(line.id, None);
        assert_eq!(line.sku, "");
        assert_eq!(line.qty, 1);
        assert_eq!(line.note, None);
        assert_eq!(line.dims, Dims { w: 1, h: 1 });
    }

    #[test]
    fn kind_mismatch_is_rejected_at_compile() {
        let err = ScanPlan::compile(&[ReturnProp::int("sku")], &Line::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Shape(ShapeError {
                kind: ShapeErrorKind::UnsupportedFieldKind,
                ..
            })
        ));
    }

    #[test]
    fn undeserializable_value_is_unsupported_and_leaves_target() {
        let mut line = Line::default();
        let plan = ScanPlan::compile(&[ReturnProp::json("qty")], &line).unwrap();
        let row = Row::from_pairs([("qty", Value::from(r#""many""#))]);
        let err = plan.apply(&row, &mut line).unwrap_err();
        assert!(matches!(
            err,
            Error::Shape(ShapeError {
                kind: ShapeErrorKind::UnsupportedFieldKind,
                ..
            })
        ));
        assert_eq!(line, Line::default());
    }

    #[test]
    fn missing_column_is_reported() {
        let mut line = Line::default();
        let plan = ScanPlan::compile(&[ReturnProp::text("sku")], &line).unwrap();
        let err = plan.apply(&Row::from_pairs([("id", 1_i64)]), &mut line).unwrap_err();
        assert!(matches!(
            err,
            Error::Shape(ShapeError {
                kind: ShapeErrorKind::MissingField,
                ..
            })
        ));
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        note: Option<String>,
        seen_at: Option<String>,
    }

    #[test]
    fn null_is_kept_per_item_whatever_the_sample_held() {
        let first = Item {
            note: Some("x".into()),
            seen_at: Some("2024-01-01T00:00:00Z".into()),
        };
        let props = [ReturnProp::text("note"), ReturnProp::timestamp("seen_at")];
        let plan = ScanPlan::compile(&props, &first).unwrap();
        let row = Row::from_pairs([("note", Value::Null), ("seen_at", Value::Null)]);

        for mut item in [first, Item::default()] {
            plan.apply(&row, &mut item).unwrap();
            assert_eq!(item, Item::default());
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Visit {
        at: chrono::NaiveDateTime,
        on: chrono::NaiveDate,
        logged: chrono::DateTime<chrono::Utc>,
    }

    fn visit() -> Visit {
        let at = chrono::NaiveDate::from_ymd_opt(2024, 5, 6)
            .and_then(|d| d.and_hms_opt(7, 8, 9))
            .unwrap();
        Visit {
            at,
            on: at.date(),
            logged: at.and_utc(),
        }
    }

    #[test]
    fn timestamps_follow_the_field_shape() {
        let mut target = visit();
        let props = [
            ReturnProp::timestamp("at"),
            ReturnProp::timestamp("on"),
            ReturnProp::timestamp("logged"),
        ];
        let plan = ScanPlan::compile(&props, &target).unwrap();

        let row = Row::from_pairs([
            ("at", Value::TimestampTz(86_400_000_000)),
            ("on", Value::Date(1)),
            ("logged", Value::Timestamp(86_400_000_000)),
        ]);
        plan.apply(&row, &mut target).unwrap();
        let day_one = chrono::NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(target.at, day_one.and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(target.on, day_one);
        assert_eq!(target.logged, target.at.and_utc());

        let nulls = Row::from_pairs([
            ("at", Value::Null),
            ("on", Value::Null),
            ("logged", Value::Null),
        ]);
        plan.apply(&nulls, &mut target).unwrap();
        let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(target.at, epoch.and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(target.on, epoch);
        assert_eq!(target.logged.timestamp(), 0);
    }
}
