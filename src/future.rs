//! A one-shot future supporting a single producer and multiple consumers.
//!
//! The first thread to [`acquire`](LoadFut::acquire) becomes the producer and
//! must eventually [`finalize`](LoadFut::finalize); other threads calling
//! [`wait`](LoadFut::wait) block until finalization, then read the stored
//! result. Threads that observe the final state return immediately without
//! touching the lock.

use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::{Condvar, Mutex};
use crate::ErrorKind;

const ST_IDLE: i8 = 0;
const ST_PRODUCING: i8 = 1;
const ST_OK: i8 = 2;
const ST_ERR: i8 = 3;

#[derive(Debug, Default)]
pub struct LoadFut {
  status: AtomicI8,
  err: Mutex<Option<ErrorKind>>,
  cv: Condvar,
}

impl LoadFut {
  #[must_use] pub fn new() -> LoadFut { LoadFut::default() }

  /// Returns true exactly once, for one thread, which then owns production
  /// and must call [`finalize`](Self::finalize) to avoid deadlocking waiters.
  pub fn acquire(&self) -> bool {
    self.status
      .compare_exchange(ST_IDLE, ST_PRODUCING, Ordering::AcqRel, Ordering::Relaxed)
      .is_ok()
  }

  /// Publish the result. Must follow a successful `acquire`, once.
  pub fn finalize(&self, result: Result<(), ErrorKind>) {
    let mut err = self.err.lock().unwrap();
    assert_eq!(self.status.load(Ordering::Acquire), ST_PRODUCING,
      "unbalanced acquire/finalize");
    let st = match result {
      Ok(()) => ST_OK,
      Err(e) => { *err = Some(e); ST_ERR }
    };
    self.status.store(st, Ordering::Release);
    drop(err);
    self.cv.notify_all();
  }

  /// Returns the result if finalized, None while idle or producing.
  #[must_use] pub fn try_wait(&self) -> Option<Result<(), ErrorKind>> {
    match self.status.load(Ordering::Acquire) {
      ST_OK => Some(Ok(())),
      ST_ERR => Some(Err(self.err.lock().unwrap().unwrap_or(ErrorKind::Invalid))),
      _ => None,
    }
  }

  /// Block until the future is finalized and return its result.
  /// Deadlocks if no thread ever finalizes.
  pub fn wait(&self) -> Result<(), ErrorKind> {
    if let Some(r) = self.try_wait() {
      return r;
    }
    let mut err = self.err.lock().unwrap();
    loop {
      match self.status.load(Ordering::Acquire) {
        ST_OK => return Ok(()),
        ST_ERR => return Err(err.unwrap_or(ErrorKind::Invalid)),
        _ => err = self.cv.wait(err).unwrap(),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn single_producer() {
    let fut = LoadFut::new();
    assert!(fut.acquire());
    assert!(!fut.acquire());
    assert!(fut.try_wait().is_none());
    fut.finalize(Ok(()));
    assert_eq!(fut.try_wait(), Some(Ok(())));
    assert_eq!(fut.wait(), Ok(()));
  }

  #[test]
  fn waiters_get_error() {
    let fut = Arc::new(LoadFut::new());
    assert!(fut.acquire());
    let mut handles = vec![];
    for _ in 0..3 {
      let fut = fut.clone();
      handles.push(std::thread::spawn(move || fut.wait()));
    }
    fut.finalize(Err(ErrorKind::NotFound));
    for h in handles {
      assert_eq!(h.join().unwrap(), Err(ErrorKind::NotFound));
    }
  }
}
