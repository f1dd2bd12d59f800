use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::SeqNr;

/// State recovered at producer-controller recreate time.
#[derive(Debug, Clone)]
pub struct LoadedState<A> {
    pub current_seq_nr: SeqNr,
    pub unconfirmed_messages: Vec<(SeqNr, A, bool)>,
}

/// Durable queue backing store. A production-grade store is out of scope;
/// this crate only needs to call the interface correctly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableProducerQueue<A>: Send + Sync
where
    A: Send + Sync + 'static,
{
    /// Persist a newly-sent message. `ack_requested` is the `ack` flag of the
    /// `SequencedMessage` that was sent.
    async fn store_message_sent(
        &self,
        seq_nr: SeqNr,
        payload: A,
        ack_requested: bool,
    ) -> anyhow::Result<()>;

    /// Persist that `seq_nr` has been confirmed.
    async fn store_message_confirmed(&self, seq_nr: SeqNr) -> anyhow::Result<()>;

    /// Recover on restart.
    async fn load_state(&self) -> anyhow::Result<LoadedState<A>>;
}

struct Entry<A> {
    payload: A,
    ack_requested: bool,
}

/// Reference `DurableProducerQueue` implementation backed by an in-process
/// `Mutex<BTreeMap<..>>`. Does not survive process restart; suitable for
/// hosts that accept "no persistence across restart" and for tests.
#[derive(Default)]
pub struct InMemoryDurableProducerQueue<A> {
    unconfirmed: Mutex<BTreeMap<SeqNr, Entry<A>>>,
}

impl<A> InMemoryDurableProducerQueue<A> {
    pub fn new() -> Self {
        Self {
            unconfirmed: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl<A> DurableProducerQueue<A> for InMemoryDurableProducerQueue<A>
where
    A: Clone + Send + Sync + 'static,
{
    async fn store_message_sent(
        &self,
        seq_nr: SeqNr,
        payload: A,
        ack_requested: bool,
    ) -> anyhow::Result<()> {
        self.unconfirmed.lock().unwrap().insert(
            seq_nr,
            Entry {
                payload,
                ack_requested,
            },
        );

        Ok(())
    }

    async fn store_message_confirmed(&self, seq_nr: SeqNr) -> anyhow::Result<()> {
        let mut unconfirmed = self.unconfirmed.lock().unwrap();
        let confirmed_seqs: Vec<SeqNr> = unconfirmed
            .range(..=seq_nr)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in confirmed_seqs {
            unconfirmed.remove(&seq);
        }

        Ok(())
    }

    async fn load_state(&self) -> anyhow::Result<LoadedState<A>> {
        let unconfirmed = self.unconfirmed.lock().unwrap();
        let current_seq_nr = unconfirmed
            .keys()
            .next_back()
            .map(|seq| *seq + 1)
            .unwrap_or(SeqNr::FIRST);
        let unconfirmed_messages = unconfirmed
            .iter()
            .map(|(seq, entry)| (*seq, entry.payload.clone(), entry.ack_requested))
            .collect();

        Ok(LoadedState {
            current_seq_nr,
            unconfirmed_messages,
        })
    }
}
