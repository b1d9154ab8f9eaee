/// Single-pole exponential moving average.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f32,
    value: Option<f32>,
}

impl Ema {
    pub const fn new(alpha: f32) -> Self {
        Self { alpha, value: None }
    }

    /// Filter that starts from a known value instead of the first input.
    pub const fn with_initial(alpha: f32, initial: f32) -> Self {
        Self {
            alpha,
            value: Some(initial),
        }
    }

    /// Feed one input. The first input seeds the filter unchanged.
    pub fn update(&mut self, input: f32) -> f32 {
        let next = match self.value {
            Some(prev) => self.alpha * input + (1.0 - self.alpha) * prev,
            None => input,
        };
        self.value = Some(next);
        next
    }

    pub fn seed(&mut self, value: f32) {
        self.value = Some(value);
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }
}

/// Two EMAs in series: the primary smooths the raw signal, the secondary
/// smooths the primary.
#[derive(Debug, Clone, Copy)]
pub struct CascadedEma {
    primary: Ema,
    secondary: Ema,
}

impl CascadedEma {
    pub const fn new(primary_alpha: f32, secondary_alpha: f32) -> Self {
        Self {
            primary: Ema::new(primary_alpha),
            secondary: Ema::new(secondary_alpha),
        }
    }

    /// Feed one raw value and return the secondary output.
    ///
    /// The very first value initializes both stages and yields `None`.
    pub fn update(&mut self, raw: f32) -> Option<f32> {
        if self.primary.value().is_none() {
            self.primary.seed(raw);
            self.secondary.seed(raw);
            return None;
        }
        let primary = self.primary.update(raw);
        Some(self.secondary.update(primary))
    }

    pub fn is_initialized(&self) -> bool {
        self.primary.value().is_some()
    }
}
