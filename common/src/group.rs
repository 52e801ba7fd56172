use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use crate::merge::RecordSource;

struct Shared<S: RecordSource> {
    src: S,
    /// Single lookahead slot; the only record ever held in memory.
    lookahead: Option<crate::record::Record>,
    seeded: bool,
    current_key: Option<String>,
    generation: u64,
}

impl<S: RecordSource> Shared<S> {
    fn fill(&mut self) -> io::Result<()> {
        if !self.seeded && self.lookahead.is_none() {
            self.lookahead = self.src.next_record()?;
            self.seeded = true;
        }
        Ok(())
    }

    fn advance(&mut self) -> io::Result<()> {
        self.lookahead = self.src.next_record()?;
        self.seeded = true;
        Ok(())
    }
}

/// Groups a sorted record stream into (key, value sequence) pairs, one
/// per distinct key, in stream order. Single pass, zero buffering: at
/// most one group view is live, and a view that has been advanced past
/// errors instead of serving another group's data.
pub struct Grouper<S: RecordSource> {
    inner: Rc<RefCell<Shared<S>>>,
}

impl<S: RecordSource> Grouper<S> {
    pub fn new(src: S) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Shared {
                src,
                lookahead: None,
                seeded: false,
                current_key: None,
                generation: 0,
            })),
        }
    }

    /// Advances to the next distinct key, skipping whatever is left of
    /// the current group, and invalidates any outstanding view.
    pub fn next_group(&mut self) -> io::Result<Option<(String, GroupValues<S>)>> {
        let mut inner = self.inner.borrow_mut();
        inner.generation += 1;
        inner.fill()?;

        if let Some(current) = inner.current_key.take() {
            while matches!(&inner.lookahead, Some(rec) if rec.key == current) {
                inner.advance()?;
            }
        }

        let Some(rec) = &inner.lookahead else {
            return Ok(None);
        };
        let key = rec.key.clone();
        inner.current_key = Some(key.clone());
        let generation = inner.generation;
        drop(inner);

        Ok(Some((
            key.clone(),
            GroupValues {
                inner: Rc::clone(&self.inner),
                key,
                generation,
            },
        )))
    }
}

/// Lazy view over the values of the current group. Valid only until the
/// owning `Grouper` advances; afterwards every call yields an error.
pub struct GroupValues<S: RecordSource> {
    inner: Rc<RefCell<Shared<S>>>,
    key: String,
    generation: u64,
}

impl<S: RecordSource> Iterator for GroupValues<S> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut inner = self.inner.borrow_mut();
        if inner.generation != self.generation {
            return Some(Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "group view for key {:?} used after the grouper advanced",
                    self.key
                ),
            )));
        }

        match &inner.lookahead {
            Some(rec) if rec.key == self.key => {
                let value = rec.value.clone();
                if let Err(e) = inner.advance() {
                    return Some(Err(e));
                }
                Some(Ok(value))
            }
            _ => None,
        }
    }
}
