// Shadow stack: explicit roots for native calls
//
// Before native code runs with term arguments, those arguments are pushed
// here so that an exception unwinding past the native frames can find and
// release them. A frame is a `None` marker followed by the frame's entries;
// every entry owns one reference.

use crate::error::fatal;
use crate::interpreter::Interpreter;
use crate::term::TermRef;
use smallvec::SmallVec;

pub(crate) type Frame = SmallVec<[TermRef; 8]>;

#[derive(Debug, Default)]
pub struct ShadowStack {
    slots: Vec<Option<TermRef>>,
}

impl ShadowStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<TermRef> {
        self.slots.get(index).copied().flatten()
    }

    // Start of the topmost frame (index of its marker).
    fn top_marker(&self) -> Option<usize> {
        self.slots.iter().rposition(Option::is_none)
    }

    fn marker_below(&self, index: usize) -> Option<usize> {
        self.slots[..index].iter().rposition(Option::is_none)
    }

    /// Entries of the topmost frame.
    pub fn top_frame(&self) -> Vec<TermRef> {
        match self.top_marker() {
            Some(m) => self.slots[m + 1..].iter().flatten().copied().collect(),
            None => Vec::new(),
        }
    }
}

impl Interpreter {
    pub fn shadow_depth(&self) -> usize {
        self.sstk.depth()
    }

    pub fn shadow_stack(&self) -> &ShadowStack {
        &self.sstk
    }

    // Pushes a frame, taking a reference to each argument. Returns the stack
    // index of the first argument.
    pub fn push_args(&mut self, xs: &[TermRef]) -> usize {
        self.new_args(xs);
        self.push_frame_owned(xs)
    }

    // Pushes a frame whose entries already carry a reference for the stack.
    pub(crate) fn push_frame_owned(&mut self, xs: &[TermRef]) -> usize {
        self.sstk.slots.push(None);
        let base = self.sstk.slots.len();
        self.sstk.slots.extend(xs.iter().map(|&x| Some(x)));
        log::trace!("shadow stack: push {} (depth {})", xs.len(), self.sstk.depth());
        base
    }

    // Pops the topmost frame, releasing its entries. `ret` is kept alive and
    // floats afterwards if the frame held its only references.
    pub fn pop_args(&mut self, ret: Option<TermRef>) {
        let Some(marker) = self.sstk.top_marker() else {
            fatal(format_args!("pop_args: shadow stack has no frame"));
        };
        let entries: Frame = self.sstk.slots.drain(marker..).flatten().collect();
        log::trace!("shadow stack: pop {} (depth {})", entries.len(), marker);
        self.free_args(ret, &entries);
    }

    // Pops the frame *below* the topmost one and moves the topmost frame down
    // into its place. This is how a tail call discards its caller's frame.
    pub fn pop_tail_args(&mut self, ret: Option<TermRef>) {
        let Some(last) = self.sstk.top_marker() else {
            fatal(format_args!("pop_tail_args: shadow stack has no frame"));
        };
        let Some(prev) = self.sstk.marker_below(last) else {
            fatal(format_args!("pop_tail_args: no frame below the top"));
        };
        let entries: Frame = self.sstk.slots.drain(prev..last).flatten().collect();
        log::trace!(
            "shadow stack: tail pop {} (depth {})",
            entries.len(),
            self.sstk.depth()
        );
        self.free_args(ret, &entries);
    }

    pub fn push_arg(&mut self, x: TermRef) -> usize {
        self.push_args(&[x])
    }

    pub fn pop_arg(&mut self) {
        self.pop_args(None)
    }

    pub fn pop_tail_arg(&mut self) {
        self.pop_tail_args(None)
    }

    // Removes the topmost frame without releasing anything; the caller takes
    // over the references.
    pub(crate) fn take_frame(&mut self) -> Frame {
        let Some(marker) = self.sstk.top_marker() else {
            fatal(format_args!("take_frame: shadow stack has no frame"));
        };
        self.sstk.slots.drain(marker..).flatten().collect()
    }

    // Releases everything pushed above `depth`.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        if self.sstk.depth() <= depth {
            return;
        }
        let entries: Frame = self.sstk.slots.drain(depth..).flatten().collect();
        log::trace!(
            "shadow stack: unwound {} entries to depth {}",
            entries.len(),
            depth
        );
        // Most recent first, mirroring normal frame pops.
        for &x in entries.iter().rev() {
            self.free(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::interpreter::Interpreter;

    fn interp() -> Interpreter {
        Interpreter::with_config(RuntimeConfig::default())
    }

    #[test]
    fn test_push_pop_roots_arguments() {
        let mut interp = interp();
        let a = interp.int(1);
        let b = interp.int(2);

        let base = interp.push_args(&[a, b]);
        assert_eq!(base, 1);
        assert_eq!(interp.shadow_depth(), 3);
        assert_eq!(interp.refc(a), 1);
        assert_eq!(interp.shadow_stack().top_frame(), vec![a, b]);

        interp.pop_args(None);
        assert_eq!(interp.shadow_depth(), 0);
        assert!(!interp.is_live(a));
        assert!(!interp.is_live(b));
    }

    #[test]
    fn test_pop_args_keeps_result() {
        let mut interp = interp();
        let a = interp.int(1);
        interp.push_arg(a);
        interp.pop_args(Some(a));
        assert!(interp.is_live(a));
        assert!(interp.is_floating(a));
    }

    #[test]
    fn test_pop_tail_args_compacts() {
        let mut interp = interp();
        let outer = interp.int(1);
        let caller = interp.int(2);
        let callee = interp.int(3);

        interp.push_arg(outer);
        interp.push_arg(caller);
        interp.push_arg(callee);
        assert_eq!(interp.shadow_depth(), 6);

        interp.pop_tail_arg();
        assert_eq!(interp.shadow_depth(), 4);
        assert!(!interp.is_live(caller));
        assert_eq!(interp.shadow_stack().top_frame(), vec![callee]);

        interp.pop_arg();
        assert_eq!(interp.shadow_stack().top_frame(), vec![outer]);
        interp.pop_arg();
        assert_eq!(interp.shadow_depth(), 0);
    }

    #[test]
    fn test_unwind_releases_everything_above_depth() {
        let mut interp = interp();
        let keep = interp.int(1);
        interp.push_arg(keep);
        let depth = interp.shadow_depth();

        let xs: Vec<_> = (0..5).map(|i| interp.int(i)).collect();
        interp.push_args(&xs[..2]);
        interp.push_args(&xs[2..]);

        interp.unwind_to(depth);
        assert_eq!(interp.shadow_depth(), depth);
        assert!(xs.iter().all(|&x| !interp.is_live(x)));
        assert!(interp.is_live(keep));
    }

    #[test]
    #[should_panic(expected = "has no frame")]
    fn test_pop_without_frame_is_fatal() {
        let mut interp = interp();
        interp.pop_args(None);
    }
}
