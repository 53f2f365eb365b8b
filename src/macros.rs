#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut data = lock!(my_mutex);
///  data.push(record);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}
