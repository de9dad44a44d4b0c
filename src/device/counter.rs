/// Number of notification events received on the current link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotificationCounter {
    count: u64,
}

impl NotificationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self) -> u64 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn value(&self) -> u64 {
        self.count
    }
}
