use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use crate::system::pipe;

use super::StageIo;

/// Upper bound on pipes created for one pipeline.
pub(crate) const MAX_PIPES: usize = 9;

/// The pipes connecting the stages of one pipeline, created up front.
///
/// A pipeline of `n` stages needs `n - 1` pipes; past [`MAX_PIPES`] the
/// excess stages keep the interpreter's own standard streams.
pub(crate) struct PipeChain {
    // (read end, write end)
    pipes: Vec<Option<(OwnedFd, OwnedFd)>>,
}

impl PipeChain {
    pub(crate) fn open(stages: usize) -> io::Result<Self> {
        let needed = stages.saturating_sub(1).min(MAX_PIPES);
        let mut pipes = Vec::with_capacity(needed);
        for _ in 0..needed {
            pipes.push(Some(pipe()?));
        }
        Ok(Self { pipes })
    }

    /// The endpoints stage `index` of `stages` attaches to: it reads its
    /// predecessor's pipe and writes its own, unless it is the last stage.
    pub(crate) fn stage_io(&self, index: usize, stages: usize) -> StageIo<'_> {
        let input = index
            .checked_sub(1)
            .and_then(|upstream| self.read_end(upstream));
        let output = if index + 1 < stages {
            self.write_end(index)
        } else {
            None
        };
        StageIo { input, output }
    }

    fn read_end(&self, index: usize) -> Option<BorrowedFd<'_>> {
        self.pipes.get(index)?.as_ref().map(|(read, _)| read.as_fd())
    }

    fn write_end(&self, index: usize) -> Option<BorrowedFd<'_>> {
        self.pipes
            .get(index)?
            .as_ref()
            .map(|(_, write)| write.as_fd())
    }

    /// Close the pipe feeding stage `index` once that stage has been forked.
    ///
    /// Both neighbours hold their own copies by then; an interpreter-held
    /// write end would starve the reader of end-of-stream.
    pub(crate) fn close_upstream(&mut self, index: usize) {
        if let Some(upstream) = index.checked_sub(1) {
            if let Some(pipe) = self.pipes.get_mut(upstream) {
                pipe.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PipeChain, MAX_PIPES};

    #[test]
    fn endpoints_follow_stage_position() {
        let chain = PipeChain::open(3).unwrap();
        assert_eq!(chain.pipes.len(), 2);

        let first = chain.stage_io(0, 3);
        assert!(first.input.is_none());
        assert!(first.output.is_some());

        let middle = chain.stage_io(1, 3);
        assert!(middle.input.is_some());
        assert!(middle.output.is_some());

        let last = chain.stage_io(2, 3);
        assert!(last.input.is_some());
        assert!(last.output.is_none());
    }

    #[test]
    fn single_stage_needs_no_pipes() {
        let chain = PipeChain::open(1).unwrap();
        assert!(chain.pipes.is_empty());
    }

    #[test]
    fn pipe_count_is_bounded() {
        let stages = MAX_PIPES + 3;
        let chain = PipeChain::open(stages).unwrap();
        assert_eq!(chain.pipes.len(), MAX_PIPES);

        // stages past the bound silently keep the shell's own streams
        let excess = chain.stage_io(MAX_PIPES + 1, stages);
        assert!(excess.input.is_none());
        assert!(excess.output.is_none());

        // the last bounded stage still writes into the final pipe
        let bounded = chain.stage_io(MAX_PIPES - 1, stages);
        assert!(bounded.input.is_some());
        assert!(bounded.output.is_some());
    }

    #[test]
    fn close_upstream_releases_the_feeding_pipe() {
        let mut chain = PipeChain::open(3).unwrap();

        chain.close_upstream(0); // no upstream pipe, nothing happens
        assert!(chain.pipes[0].is_some());

        chain.close_upstream(1);
        assert!(chain.pipes[0].is_none());
        assert!(chain.pipes[1].is_some());
    }
}
