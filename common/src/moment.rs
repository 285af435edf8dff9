use std::sync::Mutex;
use tracing::debug;

/// An encoded still frame, produced once at capture time and never mutated.
///
/// The same payload serves both display (`data_url`) and transmission to the
/// summarization service (`base64`): the data URL is just the base64 body
/// with a media-type prefix.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Base64-encoded JPEG body (the transmission form).
    pub base64: String,
    pub width: u32,
    pub height: u32,
    /// Size of the encoded JPEG in bytes, before base64 expansion.
    pub jpeg_bytes: usize,
}

impl ImagePayload {
    /// The display form: a `data:` URL renderable by any browser.
    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.base64)
    }
}

/// One captured-and-summarized frame.
///
/// Created atomically by [`MomentStore::append`] with every field populated;
/// there is no update or delete path, so a `KeyMoment` handed out to a
/// caller is immutable by construction.
#[derive(Debug, Clone)]
pub struct KeyMoment {
    /// Store-assigned, unique, monotonically increasing.
    pub id: u64,
    /// Unix milliseconds at which the frame was pulled from the source.
    pub captured_at_ms: i64,
    pub image: ImagePayload,
    pub summary: String,
}

/// Ordered, append-only collection of key moments.
///
/// Insertion order is capture order; presentation may reverse it but the
/// stored order never changes. All mutation goes through `append` under the
/// internal lock, so id assignment and insertion are a single atomic step
/// even when capture tasks land concurrently.
#[derive(Debug, Default)]
pub struct MomentStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    moments: Vec<KeyMoment>,
    next_id: u64,
}

impl MomentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly summarized frame and return the new record.
    pub fn append(
        &self,
        image: ImagePayload,
        summary: String,
        captured_at_ms: i64,
    ) -> KeyMoment {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let moment = KeyMoment {
            id: inner.next_id,
            captured_at_ms,
            image,
            summary,
        };
        inner.moments.push(moment.clone());
        debug!(
            id = moment.id,
            total = inner.moments.len(),
            "appended key moment"
        );
        moment
    }

    /// Snapshot of every moment in capture order.
    pub fn all(&self) -> Vec<KeyMoment> {
        self.inner.lock().unwrap().moments.clone()
    }

    /// Look up one moment by id.
    pub fn get(&self, id: u64) -> Option<KeyMoment> {
        self.inner
            .lock()
            .unwrap()
            .moments
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().moments.len()
    }

    /// The ordered per-frame summaries, the input to final summarization.
    pub fn summaries(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .moments
            .iter()
            .map(|m| m.summary.clone())
            .collect()
    }
}
