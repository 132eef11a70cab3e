use std::sync::atomic::{
  AtomicU64,
  Ordering
};

use tracing::debug;

use crate::activity::Activity;
use crate::datastore::{
  Backend,
  Query,
  fetch_activities
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord
)]
pub struct FetchTicket(u64);

impl FetchTicket {
  pub fn sequence(&self) -> u64 {
    self.0
  }
}

/// Tags each fetch with a sequence
/// number so a response that resolves
/// after a newer request was issued can
/// be dropped.
#[derive(Debug, Default)]
pub struct FetchSequencer {
  latest: AtomicU64
}

impl FetchSequencer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn begin(&self) -> FetchTicket {
    FetchTicket(
      self.latest.fetch_add(1, Ordering::SeqCst)
        + 1
    )
  }

  pub fn is_current(
    &self,
    ticket: FetchTicket
  ) -> bool {
    self.latest.load(Ordering::SeqCst)
      == ticket.0
  }

  /// `Some(value)` if `ticket` is still
  /// the newest request.
  pub fn accept<T>(
    &self,
    ticket: FetchTicket,
    value: T
  ) -> Option<T> {
    if self.is_current(ticket) {
      Some(value)
    } else {
      debug!(
        ticket = ticket.0,
        latest = self.latest.load(Ordering::SeqCst),
        "discarding stale fetch response"
      );
      None
    }
  }

  /// Runs an activity query under a new
  /// ticket. `Ok(None)` means a newer
  /// fetch superseded this one.
  #[tracing::instrument(skip(
    self, backend, query
  ))]
  pub fn fetch_activities(
    &self,
    backend: &dyn Backend,
    query: &Query
  ) -> anyhow::Result<Option<Vec<Activity>>>
  {
    let ticket = self.begin();
    let activities =
      fetch_activities(backend, query)?;
    Ok(self.accept(ticket, activities))
  }
}

#[cfg(test)]
mod tests {
  use anyhow::anyhow;
  use serde_json::json;

  use super::FetchSequencer;
  use crate::datastore::{
    Backend,
    Collection,
    Query,
    Row
  };

  /// Issues a newer request on the
  /// shared sequencer while its own
  /// select is still in flight.
  struct InterruptedBackend<'a> {
    sequencer: &'a FetchSequencer
  }

  impl Backend for InterruptedBackend<'_> {
    fn select(
      &self,
      _collection: Collection,
      _query: &Query
    ) -> anyhow::Result<Vec<Row>> {
      self.sequencer.begin();
      let row = match json!({"id": "a", "title": "Jam"}) {
        | serde_json::Value::Object(map) => map,
        | _ => unreachable!()
      };
      Ok(vec![row])
    }

    fn insert(
      &self,
      _collection: Collection,
      _row: Row
    ) -> anyhow::Result<Row> {
      Err(anyhow!("read only"))
    }

    fn update(
      &self,
      _collection: Collection,
      _id: &str,
      _patch: Row
    ) -> anyhow::Result<Row> {
      Err(anyhow!("read only"))
    }

    fn delete(
      &self,
      _collection: Collection,
      _id: &str
    ) -> anyhow::Result<()> {
      Err(anyhow!("read only"))
    }
  }

  #[test]
  fn fetch_superseded_mid_flight_is_dropped() {
    let seq = FetchSequencer::new();
    let backend = InterruptedBackend {
      sequencer: &seq
    };

    let result = seq
      .fetch_activities(&backend, &Query::all())
      .expect("fetch");
    assert!(result.is_none());
    assert_eq!(seq.begin().sequence(), 3);
  }

  #[test]
  fn tickets_increase_monotonically() {
    let seq = FetchSequencer::new();
    let a = seq.begin();
    let b = seq.begin();
    assert!(b > a);
    assert_eq!(b.sequence(), a.sequence() + 1);
  }

  #[test]
  fn stale_response_is_discarded() {
    let seq = FetchSequencer::new();
    let first = seq.begin();
    let second = seq.begin();

    assert_eq!(seq.accept(first, "old"), None);
    assert_eq!(seq.accept(second, "new"), Some("new"));
  }

  #[test]
  fn latest_response_is_kept() {
    let seq = FetchSequencer::new();
    let only = seq.begin();
    assert!(seq.is_current(only));
    assert_eq!(seq.accept(only, 7), Some(7));
  }
}
