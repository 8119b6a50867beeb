use std::fmt;
use std::sync::Arc;

use crate::common::RecordId;

use super::{Schema, Value};

/// Represents a single row/tuple in a table.
///
/// A tuple holds one value per schema column and, once stored, the
/// `RecordId` of the slot it lives in.
///
/// ## Tuple Binary Format
///
/// Columns are serialized back to back in schema order, each occupying
/// exactly its type's fixed width:
///
/// ```text
/// +-----------+-----------+-----+-----------+
/// | column 0  | column 1  | ... | column n  |
/// +-----------+-----------+-----+-----------+
/// ```
///
/// so every tuple of a schema is `schema.tuple_size()` bytes long.
#[derive(Debug, Clone)]
pub struct Tuple {
    /// The schema defining the structure of this tuple
    schema: Arc<Schema>,

    /// The values for each column (in schema order)
    values: Vec<Value>,

    /// Where the tuple is stored, if it has been read from or written to a page
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Creates a new tuple with the given schema and values.
    ///
    /// # Panics
    /// Panics if the number of values doesn't match the schema column count.
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Self {
        assert_eq!(
            values.len(),
            schema.column_count(),
            "Value count must match schema column count"
        );
        Self {
            schema,
            values,
            record_id: None,
        }
    }

    /// Creates a tuple from raw bytes using the given schema.
    pub fn from_bytes(schema: Arc<Schema>, data: &[u8]) -> Option<Self> {
        let mut buf = data;
        let values = schema
            .columns()
            .map(|col| Value::deserialize(&mut buf, col.data_type()))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            schema,
            values,
            record_id: None,
        })
    }

    /// Returns the schema of this tuple.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the value at the given column index.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the value for the given column name.
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.schema
            .column_index(name)
            .and_then(|i| self.values.get(i))
    }

    /// Returns all values in this tuple.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Sets the value at the given column index.
    /// Returns false if the index is out of range or the value does not fit the column.
    pub fn set_value(&mut self, index: usize, value: Value) -> bool {
        match self.schema.column(index) {
            Some(col) if value.fits(col.data_type()) => {
                self.values[index] = value;
                true
            }
            _ => false,
        }
    }

    /// Returns the number of columns/values in this tuple.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this tuple has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the location of this tuple, if it is stored on a page.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    /// Sets or clears the location of this tuple.
    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Serializes the tuple to exactly `schema.tuple_size()` bytes.
    /// Returns None if a value does not fit its column.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.schema.tuple_size());
        for (value, col) in self.values.iter().zip(self.schema.columns()) {
            value.serialize_into(col.data_type(), &mut bytes)?;
        }
        Some(bytes)
    }
}

/// Equality compares contents only; where the tuple is stored is ignored.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.values == other.values
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vals: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", vals.join("\t"))
    }
}

/// Builder for constructing tuples fluently.
pub struct TupleBuilder {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl TupleBuilder {
    /// Creates a new tuple builder for the given schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = Vec::with_capacity(schema.column_count());
        Self { schema, values }
    }

    /// Appends the value for the next column.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Builds the tuple.
    ///
    /// # Panics
    /// Panics if fewer or more values than columns were supplied.
    pub fn build(self) -> Tuple {
        Tuple::new(self.schema, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PageId, TableId};
    use crate::tuple::DataType;

    fn create_test_schema() -> Arc<Schema> {
        Schema::builder()
            .column("id", DataType::Integer)
            .column("name", DataType::String(16))
            .column("age", DataType::Integer)
            .build_arc()
    }

    #[test]
    fn test_tuple_creation() {
        let schema = create_test_schema();
        let tuple = Tuple::new(
            schema,
            vec![Value::Integer(1), Value::from("Alice"), Value::Integer(30)],
        );

        assert_eq!(tuple.len(), 3);
        assert_eq!(tuple.value(0), Some(&Value::Integer(1)));
        assert_eq!(tuple.value_by_name("name"), Some(&Value::from("Alice")));
        assert_eq!(tuple.record_id(), None);
    }

    #[test]
    fn test_tuple_builder() {
        let tuple = TupleBuilder::new(create_test_schema())
            .value(42)
            .value("Bob")
            .value(25)
            .build();

        assert_eq!(tuple.value(0), Some(&Value::Integer(42)));
        assert_eq!(tuple.value(1), Some(&Value::from("Bob")));
        assert_eq!(tuple.value(2), Some(&Value::Integer(25)));
    }

    #[test]
    fn test_serialized_width_is_fixed() {
        let schema = create_test_schema();
        let short = Tuple::new(
            schema.clone(),
            vec![Value::Integer(1), Value::from("a"), Value::Integer(2)],
        );
        let long = Tuple::new(
            schema.clone(),
            vec![
                Value::Integer(1),
                Value::from("sixteen chars!!!"),
                Value::Integer(2),
            ],
        );

        assert_eq!(short.to_bytes().unwrap().len(), schema.tuple_size());
        assert_eq!(long.to_bytes().unwrap().len(), schema.tuple_size());
    }

    #[test]
    fn test_from_bytes() {
        let schema = create_test_schema();
        let original = Tuple::new(
            schema.clone(),
            vec![Value::Integer(-7), Value::from("Carol"), Value::Integer(41)],
        );

        let bytes = original.to_bytes().unwrap();
        let recovered = Tuple::from_bytes(schema, &bytes).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_set_value_checks_type() {
        let mut tuple = TupleBuilder::new(create_test_schema())
            .value(1)
            .value("x")
            .value(2)
            .build();

        assert!(tuple.set_value(0, Value::Integer(9)));
        assert!(!tuple.set_value(0, Value::from("nine")));
        assert!(!tuple.set_value(5, Value::Integer(9)));
        assert_eq!(tuple.value(0), Some(&Value::Integer(9)));
    }

    #[test]
    fn test_equality_ignores_record_id() {
        let schema = create_test_schema();
        let a = TupleBuilder::new(schema.clone()).value(1).value("x").value(2).build();
        let mut b = a.clone();
        b.set_record_id(Some(RecordId::new(PageId::new(TableId::new(1), 0), 3)));
        assert_eq!(a, b);
    }
}
