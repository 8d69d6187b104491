use std::cell::Cell;
use std::rc::Rc;

mod generator;

/// Increments a shared counter when dropped.
struct DropCounter(Rc<Cell<u32>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}
