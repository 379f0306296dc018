/// A test case the mutators and executors operate on.
pub trait Input: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;

    /// Number of frames the mutation driver would visit in this input.
    fn frame_count(&self) -> usize {
        crate::scanner::Frames::new(self.as_bytes()).count()
    }
}

impl Input for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}
