/// Navigation of the visible scaler-read window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalCommand {
    ToggleZoom,
    First,
    Last,
    PageBack,
    PageForward,
}

/// The visible window as 1-based inclusive bin numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalView {
    pub first: usize,
    pub last: usize,
    pub user_interval: usize,
    pub range_max: usize,
    last_start: usize,
}

impl IntervalView {
    /// Starts zoomed out over `(1, range_max)`.
    pub fn new(user_interval: usize, range_max: usize) -> Self {
        Self {
            first: 1,
            last: range_max.max(1),
            user_interval: user_interval.max(1),
            range_max: range_max.max(1),
            last_start: 1,
        }
    }

    fn window(&mut self, first: usize) {
        self.first = first.max(1);
        self.last = self.first + self.user_interval - 1;
    }

    /// Shows every read again. The zoom window is still remembered.
    pub fn reset(&mut self) {
        self.first = 1;
        self.last = self.range_max;
    }

    pub fn is_zoomed(&self) -> bool {
        self.last - self.first == self.user_interval - 1
    }

    /// Applies `command` for a run with `n_reads` scaler reads.
    pub fn apply(&mut self, command: IntervalCommand, n_reads: usize) {
        match command {
            IntervalCommand::ToggleZoom => {
                if self.is_zoomed() {
                    self.last_start = self.first;
                    self.first = 1;
                    self.last = self.range_max;
                } else {
                    self.window(self.last_start);
                }
            }
            IntervalCommand::First => self.window(1),
            IntervalCommand::Last => {
                self.window((n_reads / self.user_interval) * self.user_interval + 1);
            }
            IntervalCommand::PageBack => {
                self.window(self.first.saturating_sub(self.user_interval));
            }
            IntervalCommand::PageForward => {
                let first = self.first + self.user_interval;
                if first + self.user_interval - 1 > n_reads + 2 {
                    self.apply(IntervalCommand::Last, n_reads);
                } else {
                    self.window(first);
                }
            }
        }
    }
}
