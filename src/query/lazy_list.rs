// Lazy result lists
// A LazyList keeps the query's cursor open and decodes rows only when they
// are accessed. CloseableIterator walks a LazyList once and closes it.

use crate::error::{DaoError, DaoResult};
use crate::session::{Cursor, EntityMapper, OwnedCursor};
use std::iter::FusedIterator;
use std::sync::Arc;

/// Move `cursor` to `position` and decode that row
pub(crate) fn read_row<M: EntityMapper>(
    mapper: &M,
    cursor: &mut dyn Cursor,
    position: usize,
) -> DaoResult<M::Entity> {
    if !cursor.move_to_position(position) {
        return Err(DaoError::IllegalState(format!(
            "Could not move cursor to row {} of {}",
            position,
            cursor.count()
        )));
    }
    mapper.read_entity(cursor)
}

/// An index-addressable result whose entities are decoded on demand.
///
/// The list owns the query's cursor until it is closed (or dropped).
/// With caching enabled each row is decoded at most once and every access to
/// the same index returns the same `Arc`; the cache is keyed by row index,
/// not by entity identity. Once every row is cached the cursor is released
/// early and the list keeps serving entities from the cache. Without caching
/// every access decodes the row again and returns a new instance.
///
/// After `close` every accessor fails with `DaoError::IllegalState`.
pub struct LazyList<M: EntityMapper> {
    mapper: Arc<M>,
    cursor: Option<OwnedCursor>,
    size: usize,
    cached: bool,
    entities: Vec<Option<Arc<M::Entity>>>,
    loaded_count: usize,
    closed: bool,
}

impl<M: EntityMapper> LazyList<M> {
    pub(crate) fn new(mapper: Arc<M>, cursor: OwnedCursor, cache_entities: bool) -> Self {
        let size = cursor.count();
        let mut list = Self {
            mapper,
            cursor: Some(cursor),
            size,
            cached: cache_entities,
            entities: if cache_entities { vec![None; size] } else { Vec::new() },
            loaded_count: 0,
            closed: false,
        };
        if cache_entities && size == 0 {
            list.cursor = None;
        }
        list
    }

    /// Entity at `index`, decoding it if it is not cached
    pub fn get(&mut self, index: usize) -> DaoResult<Arc<M::Entity>> {
        self.check_index(index)?;

        if let Some(entity) = self.entities.get(index).and_then(Clone::clone) {
            return Ok(entity);
        }

        let entity = Arc::new(self.load_entity(index)?);
        if self.cached {
            self.entities[index] = Some(Arc::clone(&entity));
            self.loaded_count += 1;
            if self.loaded_count == self.size {
                self.cursor = None;
                tracing::trace!(size = self.size, "lazy list fully loaded, cursor released");
            }
        }
        Ok(entity)
    }

    /// Cached entity at `index` without touching the cursor
    pub fn peek(&self, index: usize) -> DaoResult<Option<Arc<M::Entity>>> {
        self.check_index(index)?;
        Ok(self.entities.get(index).and_then(Clone::clone))
    }

    /// Decode every row not yet cached; requires a caching list
    pub fn load_remaining(&mut self) -> DaoResult<()> {
        self.check_open()?;
        if !self.cached {
            return Err(DaoError::IllegalState(
                "Entity caching must be enabled to load all entities".to_string(),
            ));
        }
        for index in 0..self.size {
            self.get(index)?;
        }
        Ok(())
    }

    /// Row count reported by the cursor when the list was created
    pub fn size(&self) -> DaoResult<usize> {
        self.check_open()?;
        Ok(self.size)
    }

    pub fn is_empty(&self) -> DaoResult<bool> {
        Ok(self.size()? == 0)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded_count
    }

    pub fn is_loaded_completely(&self) -> bool {
        self.cached && self.loaded_count == self.size
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the cursor and the cache. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cursor = None;
        self.entities = Vec::new();
    }

    /// Forward iterator over the list that leaves it open afterwards
    pub fn iter(&mut self) -> Iter<'_, M> {
        Iter {
            list: self,
            index: 0,
        }
    }

    /// Turn the list into an iterator that closes it once exhausted
    pub fn into_iter_auto_close(self) -> CloseableIterator<M> {
        CloseableIterator {
            list: self,
            index: 0,
        }
    }

    fn load_entity(&mut self, index: usize) -> DaoResult<M::Entity> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DaoError::IllegalState("Cursor already released".to_string()))?;
        read_row(self.mapper.as_ref(), &mut **cursor, index)
    }

    fn check_open(&self) -> DaoResult<()> {
        if self.closed {
            return Err(DaoError::IllegalState(
                "This lazy list is already closed".to_string(),
            ));
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> DaoResult<()> {
        self.check_open()?;
        if index >= self.size {
            return Err(DaoError::OutOfRange {
                index,
                size: self.size,
            });
        }
        Ok(())
    }
}

/// Borrowing iterator returned by [`LazyList::iter`]
pub struct Iter<'a, M: EntityMapper> {
    list: &'a mut LazyList<M>,
    index: usize,
}

impl<M: EntityMapper> Iterator for Iter<'_, M> {
    type Item = DaoResult<Arc<M::Entity>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.list.size {
            return None;
        }
        let result = self.list.get(self.index);
        // stop after the first error
        self.index = if result.is_ok() {
            self.index + 1
        } else {
            self.list.size
        };
        Some(result)
    }
}

/// Single-pass iterator that owns a lazy list.
///
/// The list (and its cursor) is closed exactly once: right after the last
/// entity is produced, after a decoding error, on an explicit `close`, or
/// when the iterator is dropped, whichever comes first.
pub struct CloseableIterator<M: EntityMapper> {
    list: LazyList<M>,
    index: usize,
}

impl<M: EntityMapper> CloseableIterator<M> {
    pub fn has_next(&self) -> bool {
        !self.list.closed && self.index < self.list.size
    }

    pub fn close(&mut self) {
        self.list.close();
    }

    pub fn is_closed(&self) -> bool {
        self.list.closed
    }
}

impl<M: EntityMapper> Iterator for CloseableIterator<M> {
    type Item = DaoResult<Arc<M::Entity>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            self.list.close();
            return None;
        }
        let result = self.list.get(self.index);
        self.index += 1;
        if result.is_err() || self.index == self.list.size {
            self.list.close();
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.list.closed {
            0
        } else {
            self.list.size - self.index
        };
        (remaining, Some(remaining))
    }
}

impl<M: EntityMapper> FusedIterator for CloseableIterator<M> {}
