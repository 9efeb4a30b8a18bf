use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{registry} discriminator {discriminator} is already registered")]
    Duplicate {
        registry: &'static str,
        discriminator: u32,
    },
    #[error("unknown {registry} discriminator {discriminator}")]
    Unknown {
        registry: &'static str,
        discriminator: u32,
    },
}

/// Maps a wire discriminator to a constructor for an empty instance of the
/// variant it names. Built once at startup and read-only afterwards.
pub struct Registry<K, T> {
    name: &'static str,
    constructors: HashMap<K, fn() -> T>,
}

impl<K, T> fmt::Debug for Registry<K, T>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("discriminators", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K, T> Registry<K, T>
where
    K: Copy + Eq + Hash + Into<u32>,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            constructors: HashMap::new(),
        }
    }

    /// Builds a registry from a static table, failing on the first collision.
    pub fn from_table(
        name: &'static str,
        table: impl IntoIterator<Item = (K, fn() -> T)>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new(name);
        for (discriminator, constructor) in table {
            registry.register(discriminator, constructor)?;
        }
        Ok(registry)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn register(&mut self, discriminator: K, constructor: fn() -> T) -> Result<(), RegistryError> {
        if self.constructors.contains_key(&discriminator) {
            return Err(RegistryError::Duplicate {
                registry: self.name,
                discriminator: discriminator.into(),
            });
        }
        self.constructors.insert(discriminator, constructor);
        Ok(())
    }

    pub fn create(&self, discriminator: K) -> Result<T, RegistryError> {
        self.constructors
            .get(&discriminator)
            .map(|constructor| constructor())
            .ok_or(RegistryError::Unknown {
                registry: self.name,
                discriminator: discriminator.into(),
            })
    }

    pub fn contains(&self, discriminator: K) -> bool {
        self.constructors.contains_key(&discriminator)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
