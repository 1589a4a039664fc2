use crate::error::FilterError;

/// Half-open `[base, end)` window into an [`EvalStack`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub base: usize,
    pub end: usize,
}

impl StackFrame {
    pub const fn len(&self) -> usize {
        self.end - self.base
    }

    pub const fn is_empty(&self) -> bool {
        self.end == self.base
    }
}

/// A stack of frames over one contiguous buffer. Only the top frame grows.
#[derive(Debug)]
pub struct EvalStack<T> {
    items: Vec<T>,
    frames: Vec<StackFrame>,
}

impl<T> Default for EvalStack<T> {
    fn default() -> Self {
        Self { items: Vec::new(), frames: Vec::new() }
    }
}

const UNDERFLOW: FilterError = FilterError::Internal("evaluation stack underflow");

impl<T> EvalStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self) {
        let base = self.items.len();
        self.frames.push(StackFrame { base, end: base });
    }

    pub fn push(&mut self, item: T) -> Result<(), FilterError> {
        let frame = self.frames.last_mut().ok_or(UNDERFLOW)?;
        self.items.push(item);
        frame.end = self.items.len();
        Ok(())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn top_frame(&self) -> Result<StackFrame, FilterError> {
        self.frames.last().copied().ok_or(UNDERFLOW)
    }

    pub fn top(&self) -> Result<&[T], FilterError> {
        let frame = self.top_frame()?;
        Ok(&self.items[frame.base..frame.end])
    }

    pub fn top_mut(&mut self) -> Result<&mut [T], FilterError> {
        let frame = self.top_frame()?;
        Ok(&mut self.items[frame.base..frame.end])
    }

    /// The frame `depth` levels below the top (0 is the top frame).
    pub fn frame(&self, depth: usize) -> Result<&[T], FilterError> {
        let index = self.frames.len().checked_sub(depth + 1).ok_or(UNDERFLOW)?;
        let frame = self.frames[index];
        Ok(&self.items[frame.base..frame.end])
    }

    pub fn frame_mut(&mut self, depth: usize) -> Result<&mut [T], FilterError> {
        let index = self.frames.len().checked_sub(depth + 1).ok_or(UNDERFLOW)?;
        let frame = self.frames[index];
        Ok(&mut self.items[frame.base..frame.end])
    }

    /// Move the top frame's items to the end of `dest` and drop the frame.
    pub fn pop_frame_into(&mut self, dest: &mut Vec<T>) -> Result<(), FilterError> {
        let frame = self.frames.pop().ok_or(UNDERFLOW)?;
        dest.extend(self.items.drain(frame.base..));
        Ok(())
    }

    /// Move the top `count` frames to `dest`, lowest frame first.
    pub fn pop_frames_into(&mut self, count: usize, dest: &mut Vec<T>) -> Result<(), FilterError> {
        if count == 0 {
            return Ok(());
        }
        let first = self.frames.len().checked_sub(count).ok_or(UNDERFLOW)?;
        let base = self.frames[first].base;
        self.frames.truncate(first);
        dest.extend(self.items.drain(base..));
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.frames.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_nest_without_overlap() {
        let mut stack = EvalStack::new();
        stack.push_frame();
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        stack.push_frame();
        assert!(stack.top().unwrap().is_empty());
        stack.push(3).unwrap();
        assert_eq!(stack.frame(1).unwrap(), &[1, 2]);
        assert_eq!(stack.top_frame().unwrap(), StackFrame { base: 2, end: 3 });

        let mut out = Vec::new();
        stack.pop_frames_into(2, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert!(stack.is_empty());
    }

    #[test]
    fn underflow_is_an_internal_error() {
        let mut stack: EvalStack<u8> = EvalStack::new();
        assert!(matches!(stack.push(1), Err(FilterError::Internal(_))));
        let mut out = Vec::new();
        assert!(stack.pop_frame_into(&mut out).is_err());
        stack.push_frame();
        assert!(stack.pop_frames_into(2, &mut out).is_err());
    }
}
