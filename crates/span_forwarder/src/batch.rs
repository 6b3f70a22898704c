/// An encoded group of spans waiting to be streamed.
///
/// `count` is the number of logical spans the payload represents; it is what
/// queue capacity and the `Sent` metric are measured in. The payload is opaque
/// to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanBatch {
    count: u64,
    payload: Vec<u8>,
}

impl SpanBatch {
    pub fn new(count: u64, payload: Vec<u8>) -> Self {
        Self { count, payload }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
