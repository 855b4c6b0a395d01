use std::fmt;

use serde::{Deserialize, Serialize};

/// A single opaque name component.
pub type Component = Vec<u8>;

/// Hierarchical name carried by every packet kind.
///
/// Comparison is component-by-component on the raw bytes; the URI form is
/// only used for display, configuration and cache keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Name {
    pub components: Vec<Component>,
}

impl Name {
    /// Create a new empty name
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a name from a URI path (e.g. "/hello/world").
    ///
    /// Empty segments are skipped, so "/", "" and "//" all yield the root name.
    pub fn from_str(path: &str) -> Self {
        let components = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.as_bytes().to_vec())
            .collect();
        Self { components }
    }

    pub fn from_components<I, C>(components: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Component>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a component to the name
    pub fn append(&mut self, component: impl Into<Component>) -> &mut Self {
        self.components.push(component.into());
        self
    }

    /// Builder-style variant of [`Name::append`].
    pub fn child(&self, component: impl Into<Component>) -> Name {
        let mut name = self.clone();
        name.append(component);
        name
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Get a prefix of this name with at most `length` components
    pub fn get_prefix(&self, length: usize) -> Name {
        Name {
            components: self.components.iter().take(length).cloned().collect(),
        }
    }

    /// Check if this name is a prefix of another name (every name is a prefix of itself)
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len() <= other.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            f.write_str("/")?;
            match std::str::from_utf8(component) {
                Ok(text) if text.chars().all(|c| !c.is_control() && c != '/' && c != '%') => {
                    f.write_str(text)?
                }
                _ => {
                    for byte in component {
                        write!(f, "%{:02X}", byte)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl From<&str> for Name {
    fn from(path: &str) -> Self {
        Name::from_str(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_creation() {
        let name = Name::from_str("/hello/world/test");
        assert_eq!(name.len(), 3);
        assert_eq!(name.get(0).unwrap(), b"hello");
        assert_eq!(name.get(2).unwrap(), b"test");
    }

    #[test]
    fn test_root_name() {
        assert!(Name::from_str("/").is_empty());
        assert!(Name::from_str("").is_empty());
        assert_eq!(Name::new().to_string(), "/");
    }

    #[test]
    fn test_prefix_relation() {
        let a = Name::from_str("/a");
        let ab = Name::from_str("/a/b");
        let ax = Name::from_str("/ax");

        assert!(a.is_prefix_of(&ab));
        assert!(ab.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&ax));
        assert!(Name::new().is_prefix_of(&a));
        assert_eq!(ab.get_prefix(1), a);
    }

    #[test]
    fn test_binary_component_display() {
        let name = Name::from_components(vec![b"seg".to_vec(), vec![0x00, 0xff]]);
        assert_eq!(name.to_string(), "/seg/%00%FF");
    }
}
