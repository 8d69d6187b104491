use std::cell::{Cell, RefCell};
use std::ptr;
use std::rc::Rc;

use super::DropCounter;
use crate::stack::{DefaultAllocator, StackConfig};
use crate::{Error, Generator, RefGenerator, State, VoidGenerator};

#[test]
fn smoke() {
    let gen = Generator::new(|y| {
        for i in 0..5 {
            y.suspend(i);
        }
    })
    .unwrap();
    assert_eq!(gen.collect::<Vec<_>>(), [0, 1, 2, 3, 4]);
}

#[test]
fn empty_body() {
    let mut gen = Generator::<u32>::new(|_| {}).unwrap();
    assert_eq!(gen.state(), State::Completed);
    assert!(!gen.valid());
    assert!(matches!(gen.current(), Err(Error::NoValue)));
    assert_eq!(gen.next(), None);
}

#[test]
fn starts_eagerly() {
    let hit = Rc::new(Cell::new(false));
    let hit2 = hit.clone();
    let gen = Generator::new(move |y| {
        hit2.set(true);
        y.suspend(1);
    })
    .unwrap();
    assert!(hit.get());
    assert_eq!(gen.state(), State::Suspended);
    assert_eq!(*gen.current().unwrap(), 1);
}

#[test]
fn advance_and_current() {
    let mut gen = Generator::new(|y| {
        y.suspend("a");
        y.suspend("b");
    })
    .unwrap();
    assert!(gen.valid());
    assert_eq!(*gen.current().unwrap(), "a");
    assert_eq!(*gen.current().unwrap(), "a");

    assert!(gen.advance().unwrap());
    assert_eq!(*gen.current().unwrap(), "b");

    assert!(!gen.advance().unwrap());
    assert!(!gen.valid());
    assert_eq!(gen.state(), State::Completed);
    assert!(matches!(gen.current(), Err(Error::NoValue)));
    assert!(matches!(
        gen.advance(),
        Err(Error::InvalidState(State::Completed))
    ));
}

#[test]
fn take_current_moves_value_out() {
    let mut gen = Generator::new(|y| {
        y.suspend(String::from("first"));
        y.suspend(String::from("second"));
    })
    .unwrap();
    assert_eq!(gen.take_current().unwrap(), "first");
    assert!(matches!(gen.take_current(), Err(Error::NoValue)));
    assert!(matches!(gen.current(), Err(Error::NoValue)));

    // The iterator does not hand out a value twice.
    assert_eq!(gen.next().as_deref(), Some("second"));
    assert_eq!(gen.next(), None);
}

#[test]
fn iterator_returns_pending_value_first() {
    let mut gen = Generator::new(|y| {
        y.suspend(1);
        y.suspend(2);
        y.suspend(3);
    })
    .unwrap();
    assert_eq!(*gen.current().unwrap(), 1);
    assert_eq!(gen.next(), Some(1));
    assert!(gen.advance().unwrap());
    assert_eq!(*gen.current().unwrap(), 2);
    assert_eq!(gen.next(), Some(2));
    assert_eq!(gen.next(), Some(3));
    assert_eq!(gen.next(), None);
    assert_eq!(gen.next(), None);
}

#[test]
fn infinite_generator() {
    let gen = Generator::new(|y| {
        let (mut a, mut b) = (0u64, 1u64);
        loop {
            y.suspend(a);
            let next = a + b;
            a = b;
            b = next;
        }
    })
    .unwrap();
    let fib: Vec<u64> = gen.skip(10).take(3).collect();
    assert_eq!(fib, [55, 89, 144]);
}

#[test]
fn suspend_from_nested_call() {
    fn walk(y: &crate::Yielder<crate::Value<u32>>, depth: u32) {
        if depth > 0 {
            walk(y, depth - 1);
        }
        y.suspend(depth);
    }

    let gen = Generator::new(|y| walk(y, 3)).unwrap();
    assert_eq!(gen.collect::<Vec<_>>(), [0, 1, 2, 3]);
}

#[test]
fn panic_on_nth_cycle() {
    let dropped = Rc::new(Cell::new(0));
    let guard = DropCounter(dropped.clone());
    let mut gen = Generator::new(move |y| {
        let _guard = guard;
        y.suspend(1);
        y.suspend(2);
        panic!("foobar");
    })
    .unwrap();

    assert_eq!(gen.next(), Some(1));
    assert!(gen.advance().unwrap());
    assert_eq!(dropped.get(), 0);
    match gen.advance() {
        Err(Error::Propagated(err)) => assert_eq!(err.message(), Some("foobar")),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(dropped.get(), 1);
    assert!(!gen.valid());
    assert_eq!(gen.state(), State::Failed);
    assert!(matches!(
        gen.advance(),
        Err(Error::InvalidState(State::Failed))
    ));
    drop(gen);
    assert_eq!(dropped.get(), 1);
}

#[test]
fn panic_before_first_suspend() {
    let dropped = Rc::new(Cell::new(0));
    let guard = DropCounter(dropped.clone());
    let result = Generator::<u32>::new(move |_| {
        let _guard = guard;
        panic!("early");
    });
    match result {
        Err(Error::Propagated(err)) => assert_eq!(err.to_string(), "coroutine panicked: early"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(dropped.get(), 1);
}

#[test]
fn panic_payload_preserved() {
    let mut gen = Generator::new(|y| {
        y.suspend(());
        std::panic::resume_unwind(Box::new(42u32));
    })
    .unwrap();
    let err = match gen.advance() {
        Err(Error::Propagated(err)) => err,
        other => panic!("unexpected result: {:?}", other),
    };
    assert_eq!(err.message(), None);
    assert_eq!(err.payload().downcast_ref::<u32>(), Some(&42));
    let payload = err.into_payload();
    assert_eq!(*payload.downcast::<u32>().unwrap(), 42);
}

#[test]
#[should_panic(expected = "foobar")]
fn panics_propagated_through_iterator() {
    let a = Rc::new(Cell::new(false));
    let b = SetOnDrop(a.clone());
    let gen = Generator::new(move |y| {
        let _b = b;
        y.suspend(1);
        panic!("foobar");
    })
    .unwrap();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| gen.for_each(drop)));
    assert!(a.get());
    std::panic::resume_unwind(result.unwrap_err());

    struct SetOnDrop(Rc<Cell<bool>>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }
}

#[test]
fn drop_mid_body_runs_destructors_once() {
    let dropped = Rc::new(Cell::new(0));
    let reached_end = Rc::new(Cell::new(false));

    let d = dropped.clone();
    let end = reached_end.clone();
    let mut gen = Generator::new(move |y| {
        let _a = DropCounter(d.clone());
        y.suspend(1);
        let _b = DropCounter(d.clone());
        y.suspend(2);
        end.set(true);
    })
    .unwrap();
    assert!(gen.advance().unwrap());
    assert_eq!(dropped.get(), 0);

    drop(gen);
    assert_eq!(dropped.get(), 2);
    assert!(!reached_end.get());
}

#[test]
fn drop_after_completion_does_not_unwind() {
    let dropped = Rc::new(Cell::new(0));
    let d = dropped.clone();
    let mut gen = Generator::new(move |y| {
        let _a = DropCounter(d);
        y.suspend(1);
    })
    .unwrap();
    assert!(!gen.advance().unwrap());
    assert_eq!(dropped.get(), 1);
    drop(gen);
    assert_eq!(dropped.get(), 1);
}

#[test]
fn drop_discards_pending_value() {
    let dropped = Rc::new(Cell::new(0));
    let d = dropped.clone();
    let gen = Generator::new(move |y| {
        y.suspend(DropCounter(d.clone()));
    })
    .unwrap();
    assert_eq!(dropped.get(), 0);
    drop(gen);
    assert_eq!(dropped.get(), 1);
}

#[test]
fn nested_generators() {
    let log = Rc::new(RefCell::new(String::new()));

    let log2 = log.clone();
    let mut parent = Generator::new(move |y| {
        log2.borrow_mut().push('1');
        let log3 = log2.clone();
        let child = VoidGenerator::new(move |y| {
            for _ in 0..6 {
                log3.borrow_mut().push('2');
                y.suspend();
            }
        })
        .unwrap();
        y.suspend(child);
        log2.borrow_mut().push('1');
    })
    .unwrap();

    let mut child = parent.take_current().unwrap();
    while child.advance().unwrap() {}
    assert!(!parent.advance().unwrap());
    assert_eq!(*log.borrow(), "12222221");
}

#[test]
fn recursive_generators() {
    enum Tree {
        Leaf(u32),
        Node(Box<Tree>, Box<Tree>),
    }

    fn walk(tree: Rc<Tree>, path: Vec<usize>) -> Generator<u32> {
        Generator::new(move |y| {
            let mut node: &Tree = &tree;
            for &i in &path {
                if let Tree::Node(l, r) = node {
                    node = if i == 0 { l } else { r };
                }
            }
            match node {
                Tree::Leaf(v) => y.suspend(*v),
                Tree::Node(..) => {
                    for i in 0..2 {
                        let mut sub = path.clone();
                        sub.push(i);
                        for v in walk(tree.clone(), sub) {
                            y.suspend(v);
                        }
                    }
                }
            }
        })
        .unwrap()
    }

    use Tree::*;
    let tree = Rc::new(Node(
        Box::new(Node(Box::new(Leaf(1)), Box::new(Leaf(2)))),
        Box::new(Node(
            Box::new(Leaf(3)),
            Box::new(Node(Box::new(Leaf(4)), Box::new(Leaf(5)))),
        )),
    ));
    assert_eq!(walk(tree, vec![]).collect::<Vec<_>>(), [1, 2, 3, 4, 5]);
}

#[test]
fn move_only_values_are_not_copied() {
    let addr = Rc::new(Cell::new(ptr::null()));
    let addr2 = addr.clone();
    let mut gen = Generator::new(move |y| {
        let data = vec![1u8, 2, 3];
        addr2.set(data.as_ptr());
        y.suspend(data);
    })
    .unwrap();
    let data = gen.take_current().unwrap();
    assert_eq!(data.as_ptr(), addr.get());
    assert_eq!(data, [1, 2, 3]);
}

#[test]
fn references_point_into_body() {
    let addr = Rc::new(Cell::new(ptr::null::<u64>()));
    let addr2 = addr.clone();
    let mut gen = RefGenerator::<u64>::new(move |y| {
        let mut local = 7u64;
        addr2.set(&local);
        y.suspend(&local);
        local += 1;
        y.suspend(&local);
    })
    .unwrap();
    assert!(ptr::eq(gen.current().unwrap(), addr.get()));
    assert_eq!(*gen.current().unwrap(), 7);
    assert!(gen.advance().unwrap());
    assert_eq!(*gen.current().unwrap(), 8);
    assert!(!gen.advance().unwrap());
    assert!(matches!(gen.current(), Err(Error::NoValue)));
}

#[test]
fn unsized_references() {
    let mut gen = RefGenerator::<str>::new(|y| {
        let mut buf = String::new();
        for word in ["alpha", "beta", "gamma"] {
            buf.clear();
            buf.push_str(word);
            y.suspend(&buf);
        }
    })
    .unwrap();
    let mut words = vec![];
    loop {
        words.push(gen.current().unwrap().to_uppercase());
        if !gen.advance().unwrap() {
            break;
        }
    }
    assert_eq!(words, ["ALPHA", "BETA", "GAMMA"]);
}

#[test]
fn void_generator_ordering() {
    let log = Rc::new(RefCell::new(vec![]));
    let log2 = log.clone();
    let mut gen = VoidGenerator::new(move |y| {
        for i in 0..3 {
            log2.borrow_mut().push(format!("body {}", i));
            y.suspend();
        }
    })
    .unwrap();
    let mut i = 0;
    while gen.next().is_some() {
        log.borrow_mut().push(format!("caller {}", i));
        i += 1;
    }
    assert_eq!(
        *log.borrow(),
        ["body 0", "caller 0", "body 1", "caller 1", "body 2", "caller 2"]
    );
    assert_eq!(gen.state(), State::Completed);
}

#[test]
fn on_parent_stack() {
    fn recurse(i: u32, p: &mut [u8; 10000]) {
        unsafe {
            // Ensure the stack allocation isn't optimized away.
            ptr::read_volatile(&p);
        }
        if i > 0 {
            recurse(i - 1, &mut [0; 10000]);
        }
    }

    // The coroutine stack is far too small for the recursion.
    let allocator = DefaultAllocator::new(StackConfig::fixed(64 * 1024));
    let mut gen = Generator::with_allocator(allocator, |y| {
        let depth = y.on_parent_stack(|| {
            recurse(50, &mut [0; 10000]);
            50
        });
        y.suspend(depth);
    })
    .unwrap();
    assert_eq!(gen.next(), Some(50));
}

#[test]
fn stack_growth() {
    let mut gen = Generator::new(|y| {
        fn recurse(i: u32, p: &mut [u8; 10000]) {
            unsafe {
                // Ensure the stack allocation isn't optimized away.
                ptr::read_volatile(&p);
            }
            if i > 0 {
                recurse(i - 1, &mut [0; 10000]);
            }
        }

        // Use ~500KB of stack.
        recurse(50, &mut [0; 10000]);
        y.suspend(());
    })
    .unwrap();
    assert_eq!(gen.next(), Some(()));
    assert_eq!(gen.next(), None);
}

#[test]
fn backtrace_traces_to_host() {
    #[inline(never)] // try to get this to show up in backtraces
    fn look_for_me() {
        run_test();
    }
    fn assert_contains_host() {
        let trace = backtrace::Backtrace::new();
        println!("{:?}", trace);
        assert!(trace
            .frames()
            .iter()
            .flat_map(|f| f.symbols())
            .filter_map(|s| Some(s.name()?.to_string()))
            .any(|s| s.contains("look_for_me")));
    }

    fn run_test() {
        assert_contains_host();
        let mut gen = VoidGenerator::new(move |y| {
            assert_contains_host();
            y.suspend();
            y.on_parent_stack(|| assert_contains_host());
            y.suspend();
            assert_contains_host();
        })
        .unwrap();
        assert!(gen.advance().unwrap());
        assert!(!gen.advance().unwrap());
    }

    look_for_me();
}

#[test]
fn debug_output() {
    let gen = Generator::new(|y| y.suspend(1)).unwrap();
    let text = format!("{:?}", gen);
    assert!(text.contains("Suspended"), "{}", text);
    assert!(text.contains("Value"), "{}", text);
}
