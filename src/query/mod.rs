// Query module - repeatable, parameterized queries returning entities
pub mod lazy_list;
pub mod listener;

pub use lazy_list::{CloseableIterator, Iter, LazyList};
pub use listener::{LoggingQueryListener, QueryListener, QueryMode, QueryTiming};

use crate::context::DaoContext;
use crate::error::{DaoError, DaoResult};
use crate::session::{EntityMapper, OwnedCursor};
use crate::storage::Value;
use lazy_list::read_row;
use std::sync::Arc;
use std::time::Instant;

/// What a parameter slot is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Bound through `set_parameter`
    Parameter,
    /// Reserved for `set_limit`
    Limit,
    /// Reserved for `set_offset`
    Offset,
}

/// Converts a value into the text bound into a parameter slot.
/// `None` is the SQL NULL marker.
pub trait ToParameter {
    fn to_parameter(&self) -> Option<String>;
}

impl ToParameter for str {
    fn to_parameter(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl ToParameter for String {
    fn to_parameter(&self) -> Option<String> {
        Some(self.clone())
    }
}

/// Booleans bind as 1/0
impl ToParameter for bool {
    fn to_parameter(&self) -> Option<String> {
        Some(if *self { "1" } else { "0" }.to_string())
    }
}

impl ToParameter for Value {
    fn to_parameter(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => b.to_parameter(),
            other => Some(other.to_string()),
        }
    }
}

impl<T: ToParameter> ToParameter for Option<T> {
    fn to_parameter(&self) -> Option<String> {
        self.as_ref().and_then(ToParameter::to_parameter)
    }
}

impl<T: ToParameter + ?Sized> ToParameter for &T {
    fn to_parameter(&self) -> Option<String> {
        (**self).to_parameter()
    }
}

macro_rules! impl_to_parameter_display {
    ($($ty:ty),*) => {
        $(
            impl ToParameter for $ty {
                fn to_parameter(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

impl_to_parameter_display!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, char);

/// A repeatable query returning entities of `M::Entity`.
///
/// The query keeps a compiled SQL template and one text slot per `?`
/// placeholder. Slots can be changed between executions; the slot table
/// itself never grows or shrinks. A slot may be reserved at construction for
/// LIMIT or OFFSET, after which only `set_limit`/`set_offset` write it.
///
/// Setters take `&mut self` and executions take `&self`, so sharing a query
/// across threads while changing its parameters needs external locking.
pub struct Query<M: EntityMapper> {
    context: Arc<DaoContext>,
    mapper: Arc<M>,
    sql: String,
    parameters: Vec<Option<String>>,
    limit_position: Option<usize>,
    offset_position: Option<usize>,
}

impl<M: EntityMapper> Query<M> {
    /// Create a query with one slot per initial value
    pub fn new<I, P>(
        context: Arc<DaoContext>,
        mapper: Arc<M>,
        sql: impl Into<String>,
        values: I,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: ToParameter,
    {
        Self {
            context,
            mapper,
            sql: sql.into(),
            parameters: values.into_iter().map(|v| v.to_parameter()).collect(),
            limit_position: None,
            offset_position: None,
        }
    }

    /// Reserve the slot at `position` for the limit
    pub fn with_limit_position(mut self, position: usize) -> DaoResult<Self> {
        if self.limit_position.is_some() {
            return Err(DaoError::IllegalState(
                "Limit position is already set".to_string(),
            ));
        }
        self.check_reservable(position)?;
        self.limit_position = Some(position);
        Ok(self)
    }

    /// Reserve the slot at `position` for the offset
    pub fn with_offset_position(mut self, position: usize) -> DaoResult<Self> {
        if self.offset_position.is_some() {
            return Err(DaoError::IllegalState(
                "Offset position is already set".to_string(),
            ));
        }
        self.check_reservable(position)?;
        self.offset_position = Some(position);
        Ok(self)
    }

    fn check_reservable(&self, position: usize) -> DaoResult<()> {
        match self.slot_kind(position) {
            Some(SlotKind::Parameter) => Ok(()),
            Some(kind) => Err(DaoError::InvalidArgument(format!(
                "Parameter index {} is already reserved as {:?}",
                position, kind
            ))),
            None => Err(DaoError::InvalidArgument(format!(
                "Parameter index {} out of range for {} slot(s)",
                position,
                self.parameters.len()
            ))),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Current slot values, in placeholder order
    pub fn parameters(&self) -> &[Option<String>] {
        &self.parameters
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn limit_position(&self) -> Option<usize> {
        self.limit_position
    }

    pub fn offset_position(&self) -> Option<usize> {
        self.offset_position
    }

    /// Kind of the slot at `index`, None if there is no such slot
    pub fn slot_kind(&self, index: usize) -> Option<SlotKind> {
        if index >= self.parameters.len() {
            None
        } else if Some(index) == self.limit_position {
            Some(SlotKind::Limit)
        } else if Some(index) == self.offset_position {
            Some(SlotKind::Offset)
        } else {
            Some(SlotKind::Parameter)
        }
    }

    /// Set the parameter (0 based) at the position it was added when building the query.
    /// Fails with `InvalidArgument` for limit/offset slots and nonexistent indices.
    pub fn set_parameter<P: ToParameter>(&mut self, index: usize, parameter: P) -> DaoResult<()> {
        match self.slot_kind(index) {
            Some(SlotKind::Parameter) => {
                self.parameters[index] = parameter.to_parameter();
                Ok(())
            }
            Some(kind) => Err(DaoError::InvalidArgument(format!(
                "Illegal parameter index: {} is reserved for {:?}",
                index, kind
            ))),
            None => Err(DaoError::InvalidArgument(format!(
                "Illegal parameter index: {} (query has {} slot(s))",
                index,
                self.parameters.len()
            ))),
        }
    }

    /// Set the maximum number of results. The limit slot must have been reserved.
    pub fn set_limit(&mut self, limit: i64) -> DaoResult<()> {
        let position = self.limit_position.ok_or_else(|| {
            DaoError::IllegalState(
                "Limit must be configured when the query is built before it can be set".to_string(),
            )
        })?;
        self.parameters[position] = Some(limit.to_string());
        Ok(())
    }

    /// Set the number of results to skip. The offset slot must have been reserved.
    pub fn set_offset(&mut self, offset: i64) -> DaoResult<()> {
        let position = self.offset_position.ok_or_else(|| {
            DaoError::IllegalState(
                "Offset must be configured when the query is built before it can be set"
                    .to_string(),
            )
        })?;
        self.parameters[position] = Some(offset.to_string());
        Ok(())
    }

    /// Execute the query and load every entity into memory
    pub fn list(&self) -> DaoResult<Vec<M::Entity>> {
        let listener = self.context.query_listener();
        let start = Instant::now();
        let mut cursor = self.open_cursor()?;
        let db_query_time = start.elapsed();

        let mut entities = Vec::with_capacity(cursor.count());
        for position in 0..cursor.count() {
            entities.push(read_row(self.mapper.as_ref(), &mut *cursor, position)?);
        }
        drop(cursor);

        if let Some(listener) = listener {
            let timing = QueryTiming {
                mode: QueryMode::List,
                db_query_time,
                total_time: Some(start.elapsed()),
            };
            listener.on_query(&self.sql, &timing);
        }
        Ok(entities)
    }

    /// Execute the query and return a list that decodes entities on first
    /// access and caches them. Close the list to release its cursor.
    pub fn list_lazy(&self) -> DaoResult<LazyList<M>> {
        self.open_lazy(true, QueryMode::ListLazy)
    }

    /// Execute the query and return a list that decodes entities on every
    /// access. Close the list to release its cursor.
    pub fn list_lazy_uncached(&self) -> DaoResult<LazyList<M>> {
        self.open_lazy(false, QueryMode::ListLazyUncached)
    }

    /// Execute the query and return an iterator that closes its cursor once
    /// it is fully consumed (or closed, or dropped)
    pub fn list_iterator(&self) -> DaoResult<CloseableIterator<M>> {
        Ok(self
            .open_lazy(false, QueryMode::ListIterator)?
            .into_iter_auto_close())
    }

    /// Execute the query and return the single matching entity, or None.
    /// Fails with `NonUniqueResult` if more than one row matched.
    pub fn unique(&self) -> DaoResult<Option<M::Entity>> {
        self.load_unique(QueryMode::Unique)
    }

    /// Like [`Query::unique`] but fails with `EntityNotFound` when nothing matched
    pub fn unique_or_throw(&self) -> DaoResult<M::Entity> {
        self.load_unique(QueryMode::UniqueOrThrow)?
            .ok_or(DaoError::EntityNotFound)
    }

    fn open_cursor(&self) -> DaoResult<OwnedCursor> {
        let cursor = self
            .context
            .database()
            .raw_query(&self.sql, &self.parameters)?;
        Ok(OwnedCursor::new(cursor))
    }

    fn open_lazy(&self, cached: bool, mode: QueryMode) -> DaoResult<LazyList<M>> {
        let listener = self.context.query_listener();
        let start = Instant::now();
        let cursor = self.open_cursor()?;
        let db_query_time = start.elapsed();

        let list = LazyList::new(Arc::clone(&self.mapper), cursor, cached);
        if let Some(listener) = listener {
            let timing = QueryTiming {
                mode,
                db_query_time,
                total_time: None,
            };
            listener.on_query(&self.sql, &timing);
        }
        Ok(list)
    }

    fn load_unique(&self, mode: QueryMode) -> DaoResult<Option<M::Entity>> {
        let listener = self.context.query_listener();
        let start = Instant::now();
        let mut cursor = self.open_cursor()?;
        let db_query_time = start.elapsed();

        let entity = match cursor.count() {
            0 => None,
            1 => Some(read_row(self.mapper.as_ref(), &mut *cursor, 0)?),
            count => return Err(DaoError::NonUniqueResult(count)),
        };
        drop(cursor);

        if let Some(listener) = listener {
            let timing = QueryTiming {
                mode,
                db_query_time,
                total_time: Some(start.elapsed()),
            };
            listener.on_query(&self.sql, &timing);
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RecordMapper;
    use crate::storage::MemoryDatabase;

    fn query(sql: &str, values: Vec<Option<&str>>) -> Query<RecordMapper> {
        let context = Arc::new(DaoContext::new(Arc::new(MemoryDatabase::new())));
        Query::new(context, Arc::new(RecordMapper), sql, values)
    }

    #[test]
    fn test_to_parameter_forms() {
        assert_eq!(42i64.to_parameter(), Some("42".to_string()));
        assert_eq!(true.to_parameter(), Some("1".to_string()));
        assert_eq!("x".to_parameter(), Some("x".to_string()));
        assert_eq!(None::<i32>.to_parameter(), None);
        assert_eq!(Value::Null.to_parameter(), None);
        assert_eq!(Value::Float(1.5).to_parameter(), Some("1.5".to_string()));
    }

    #[test]
    fn test_reserving_a_slot_twice_fails() {
        let q = query("SELECT * FROM t LIMIT ? OFFSET ?", vec![Some("1"), Some("0")]);
        let q = q.with_limit_position(0).unwrap();
        assert!(matches!(
            q.with_limit_position(1),
            Err(DaoError::IllegalState(_))
        ));

        let q = query("SELECT * FROM t LIMIT ? OFFSET ?", vec![Some("1"), Some("0")]);
        let q = q.with_limit_position(0).unwrap();
        assert!(matches!(
            q.with_offset_position(0),
            Err(DaoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reserving_out_of_range_slot_fails() {
        let q = query("SELECT * FROM t", vec![]);
        assert!(matches!(
            q.with_offset_position(0),
            Err(DaoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_slot_kinds() {
        let q = query("SELECT * FROM t WHERE a = ? LIMIT ? OFFSET ?", vec![None, None, None])
            .with_limit_position(1)
            .unwrap()
            .with_offset_position(2)
            .unwrap();
        assert_eq!(q.slot_kind(0), Some(SlotKind::Parameter));
        assert_eq!(q.slot_kind(1), Some(SlotKind::Limit));
        assert_eq!(q.slot_kind(2), Some(SlotKind::Offset));
        assert_eq!(q.slot_kind(3), None);
    }

    #[test]
    fn test_set_parameter_out_of_range() {
        let mut q = query("SELECT * FROM t WHERE a = ?", vec![None]);
        assert!(matches!(
            q.set_parameter(1, "x"),
            Err(DaoError::InvalidArgument(_))
        ));
        q.set_parameter(0, None::<&str>).unwrap();
        assert_eq!(q.parameters(), &[None]);
    }
}
