//! Fixed-capacity FIFO that is shared between the sampling interrupt and thread mode.
//!
//! Every access runs inside a critical section, so the producer and the consumer may live in
//! different execution contexts. What happens on a full or an empty buffer is chosen with type
//! parameters, so that the checks compile away where they are not wanted.
use core::cell::RefCell;
use core::marker::PhantomData;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Behaviour of `put` on a full buffer.
pub trait OverflowPolicy {
    const ON_FULL: OnFull;
}

/// Behaviour of `get` on an empty buffer.
pub trait UnderflowPolicy {
    const ON_EMPTY: OnEmpty;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OnFull {
    DropOldest,
    DropNewest,
    Unchecked,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OnEmpty {
    ReturnDefault,
    Unchecked,
}

/// Discard the oldest element to make room for the new one.
pub struct DropOldest;

/// Discard the element that does not fit.
pub struct DropNewest;

/// Return the element's default value (zero, for samples) without touching the buffer.
pub struct ReturnZero;

/// The caller guarantees that the buffer never overflows (or underflows).
///
/// Violations are caught by debug assertions. In release builds, the buffer contents are
/// unspecified afterwards, but accesses stay in bounds.
pub struct Unchecked;

impl OverflowPolicy for DropOldest {
    const ON_FULL: OnFull = OnFull::DropOldest;
}

impl OverflowPolicy for DropNewest {
    const ON_FULL: OnFull = OnFull::DropNewest;
}

impl OverflowPolicy for Unchecked {
    const ON_FULL: OnFull = OnFull::Unchecked;
}

impl UnderflowPolicy for ReturnZero {
    const ON_EMPTY: OnEmpty = OnEmpty::ReturnDefault;
}

impl UnderflowPolicy for Unchecked {
    const ON_EMPTY: OnEmpty = OnEmpty::Unchecked;
}

struct Ring<T, const N: usize> {
    elements: [T; N],
    head: usize,
    tail: usize,
    count: usize,
}

impl<T: Copy + Default, const N: usize> Ring<T, N> {
    const MASK: usize = N - 1;

    fn put<O: OverflowPolicy>(&mut self, element: T) {
        if self.count == N {
            match O::ON_FULL {
                OnFull::DropNewest => return,
                OnFull::DropOldest => self.pop(),
                OnFull::Unchecked => {
                    debug_assert!(false, "ring buffer overflow");
                    self.pop()
                }
            };
        }

        self.elements[self.head] = element;
        self.head = (self.head + 1) & Self::MASK;
        self.count += 1;
    }

    fn pop(&mut self) -> T {
        let element = self.elements[self.tail];
        self.tail = (self.tail + 1) & Self::MASK;
        self.count -= 1;

        element
    }

    fn get<U: UnderflowPolicy>(&mut self) -> T {
        if self.count == 0 {
            match U::ON_EMPTY {
                OnEmpty::ReturnDefault => return T::default(),
                OnEmpty::Unchecked => {
                    debug_assert!(false, "ring buffer underflow");
                    return self.elements[self.tail];
                }
            }
        }

        self.pop()
    }

    fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

/// A ring buffer of `N` elements, where `N` is a power of two.
pub struct RingBuffer<T, const N: usize, O = DropOldest, U = ReturnZero> {
    ring: Mutex<CriticalSectionRawMutex, RefCell<Ring<T, N>>>,
    _policy: PhantomData<(O, U)>,
}

impl<T, const N: usize, O, U> RingBuffer<T, N, O, U>
where
    T: Copy + Default,
    O: OverflowPolicy,
    U: UnderflowPolicy,
{
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N.is_power_of_two(), "capacity must be a power of two");

    /// Create an empty buffer.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;

        Self {
            ring: Mutex::new(RefCell::new(Ring {
                elements: [T::default(); N],
                head: 0,
                tail: 0,
                count: 0,
            })),
            _policy: PhantomData,
        }
    }

    /// Reset to empty.
    pub fn init(&self) {
        self.ring.lock(|ring| ring.borrow_mut().clear());
    }

    /// Append an element, subject to the overflow policy.
    pub fn put(&self, element: T) {
        self.ring.lock(|ring| ring.borrow_mut().put::<O>(element));
    }

    /// Append all elements of a slice within one critical section.
    pub fn put_slice(&self, elements: &[T]) {
        self.ring.lock(|ring| {
            let mut ring = ring.borrow_mut();
            for element in elements {
                ring.put::<O>(*element);
            }
        });
    }

    /// Remove the oldest element, subject to the underflow policy.
    pub fn get(&self) -> T {
        self.ring.lock(|ring| ring.borrow_mut().get::<U>())
    }

    /// Remove exactly `elements.len()` elements, if that many are stored.
    ///
    /// Returns `false` and leaves the buffer untouched otherwise.
    pub fn get_exact(&self, elements: &mut [T]) -> bool {
        self.ring.lock(|ring| {
            let mut ring = ring.borrow_mut();
            if ring.count < elements.len() {
                return false;
            }

            for element in elements.iter_mut() {
                *element = ring.pop();
            }
            true
        })
    }

    /// The number of stored elements.
    pub fn len(&self) -> usize {
        self.ring.lock(|ring| ring.borrow().count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize, O, U> Default for RingBuffer<T, N, O, U>
where
    T: Copy + Default,
    O: OverflowPolicy,
    U: UnderflowPolicy,
{
    fn default() -> Self {
        Self::new()
    }
}
