//! Descriptor allocation, standing in for the VFS's fd table (§4.7).

use std::collections::HashMap;
use std::sync::Mutex;

use linux_errno::Errno;

pub trait FileTable<T>: Send + Sync {
    fn insert(&self, file: T) -> Result<i32, Errno>;
    fn get(&self, fd: i32) -> Result<T, Errno>
    where
        T: Clone;
    fn remove(&self, fd: i32) -> Result<T, Errno>;
}

/// A process-local descriptor table guarded by a single mutex. Real
/// integration with a guest VFS replaces this with the VFS's own table;
/// this one is enough to let the socket/futex core run and be tested
/// standalone.
pub struct SimpleFileTable<T> {
    next_fd: Mutex<i32>,
    entries: Mutex<HashMap<i32, T>>,
}

impl<T> Default for SimpleFileTable<T> {
    fn default() -> Self {
        SimpleFileTable { next_fd: Mutex::new(3), entries: Mutex::new(HashMap::new()) }
    }
}

impl<T> SimpleFileTable<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Send> FileTable<T> for SimpleFileTable<T> {
    fn insert(&self, file: T) -> Result<i32, Errno> {
        let mut next_fd = self.next_fd.lock().unwrap();
        let fd = *next_fd;
        *next_fd = next_fd.checked_add(1).ok_or(Errno::EMFILE)?;
        self.entries.lock().unwrap().insert(fd, file);
        Ok(fd)
    }

    fn get(&self, fd: i32) -> Result<T, Errno>
    where
        T: Clone,
    {
        self.entries.lock().unwrap().get(&fd).cloned().ok_or(Errno::EBADF)
    }

    fn remove(&self, fd: i32) -> Result<T, Errno> {
        self.entries.lock().unwrap().remove(&fd).ok_or(Errno::EBADF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_entries_are_retrievable_by_their_fd() {
        let table: SimpleFileTable<&'static str> = SimpleFileTable::new();
        let fd = table.insert("socket-a").unwrap();
        assert_eq!(table.get(fd).unwrap(), "socket-a");
    }

    #[test]
    fn removing_an_unknown_fd_is_ebadf() {
        let table: SimpleFileTable<&'static str> = SimpleFileTable::new();
        assert_eq!(table.remove(42), Err(Errno::EBADF));
    }

    #[test]
    fn fds_are_allocated_in_increasing_order_starting_at_3() {
        let table: SimpleFileTable<i32> = SimpleFileTable::new();
        let a = table.insert(1).unwrap();
        let b = table.insert(2).unwrap();
        assert_eq!(a, 3);
        assert_eq!(b, 4);
    }
}
