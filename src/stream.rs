/*! Streams connecting blocks.

Trimmed down from the teacher's `stream.rs`: every item flowing through
this pipeline is a heap-allocated record (a frame, a parsed record, an
event), never a raw sample, so only the teacher's no-copy stream
(`NCReadStream`/`NCWriteStream`) is kept. The POD circular-buffer stream
used for continuous sample data has no counterpart here.

The pipeline is single-threaded (§5), so this is a plain `Rc<RefCell<..>>`
queue rather than the teacher's `Arc<Mutex<..>>` — there is exactly one
owner thread calling `work()` on every block in turn.
*/

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A value attached to an item flowing through a stream, carrying
/// side-channel metadata (e.g. where a frame started in the transport).
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Boolean flag.
    Bool(bool),
    /// Unsigned counter or position.
    U64(u64),
    /// Free-form string.
    String(String),
}

/// A tag: a key/value pair attached to a pushed item.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    key: String,
    val: TagValue,
}

impl Tag {
    /// Create a new tag.
    #[must_use]
    pub fn new(key: impl Into<String>, val: TagValue) -> Self {
        Self {
            key: key.into(),
            val,
        }
    }

    /// Tag key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tag value.
    #[must_use]
    pub fn val(&self) -> &TagValue {
        &self.val
    }
}

struct Entry<T> {
    val: T,
    tags: Vec<Tag>,
}

struct Inner<T> {
    queue: RefCell<VecDeque<Entry<T>>>,
    capacity: usize,
}

/// Read side of a no-copy stream.
pub struct NCReadStream<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for NCReadStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Write side of a no-copy stream.
pub struct NCWriteStream<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for NCWriteStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

const DEFAULT_CAPACITY: usize = 65536;

/// Create a new stream pair for items that aren't `Copy` (frames,
/// records, events: everything in this crate).
#[must_use]
pub fn new_nocopy_stream<T>() -> (NCWriteStream<T>, NCReadStream<T>) {
    let inner = Rc::new(Inner {
        queue: RefCell::new(VecDeque::new()),
        capacity: DEFAULT_CAPACITY,
    });
    (
        NCWriteStream {
            inner: inner.clone(),
        },
        NCReadStream { inner },
    )
}

impl<T> NCReadStream<T> {
    /// Pop one item, if any is available.
    #[must_use]
    pub fn pop(&self) -> Option<(T, Vec<Tag>)> {
        self.inner
            .queue
            .borrow_mut()
            .pop_front()
            .map(|e| (e.val, e.tags))
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.queue.borrow().is_empty()
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.queue.borrow().len()
    }
}

impl<T> NCWriteStream<T> {
    /// Push one item, with tags.
    ///
    /// This doesn't enforce capacity; callers with bounded-memory
    /// requirements should check [`NCWriteStream::remaining`] first.
    pub fn push(&self, val: T, tags: impl Into<Vec<Tag>>) {
        self.inner.queue.borrow_mut().push_back(Entry {
            val,
            tags: tags.into(),
        });
    }

    /// Remaining capacity before the stream is considered full.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inner
            .capacity
            .saturating_sub(self.inner.queue.borrow().len())
    }
}
