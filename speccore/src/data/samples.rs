use crate::error::{Result, SpecError};

/// Supplies the raw count sequence for a peak search.
///
/// Implementations are read once, synchronously, at the start of a finder
/// invocation. Counts must be non-negative and are returned in acquisition
/// order.
pub trait SampleSource {
    type Error: From<SpecError>;

    fn read_samples(&mut self) -> std::result::Result<Vec<i64>, Self::Error>;
}

/// Counts already held in memory, e.g. taken from a request body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InMemorySamples {
    counts: Vec<i64>,
}

impl InMemorySamples {
    pub fn new(counts: Vec<i64>) -> Result<Self> {
        if let Some(i) = counts.iter().position(|&c| c < 0) {
            return Err(SpecError::validation(
                format!("samples[{}]", i),
                format!("counts must be non-negative, got {}", counts[i]),
            ));
        }
        Ok(InMemorySamples { counts })
    }
}

impl SampleSource for InMemorySamples {
    type Error = SpecError;

    fn read_samples(&mut self) -> Result<Vec<i64>> {
        Ok(self.counts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_samples() {
        let mut source = InMemorySamples::new(vec![1, 2, 3]).unwrap();
        assert_eq!(source.read_samples().unwrap(), vec![1, 2, 3]);
        assert!(InMemorySamples::new(vec![1, -2]).is_err());
    }
}
