use std::time::Duration;

use crate::name::Name;
use crate::packets::{Data, Interest, Nack, Packet, PushPacket};

/// Validation errors for decoded packets
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Empty name is not allowed")]
    EmptyName,
    #[error("Name component too large: {size} bytes (max: {max})")]
    ComponentTooLarge { size: usize, max: usize },
    #[error("Name too deep: {depth} components (max: {max})")]
    NameTooDeep { depth: usize, max: usize },
    #[error("Interest lifetime must be positive")]
    ZeroLifetime,
    #[error("Content too large: {size} bytes (max: {max})")]
    ContentTooLarge { size: usize, max: usize },
}

/// Limits applied to incoming packets before they enter a pipeline
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub max_name_components: usize,
    pub max_component_size: usize,
    pub max_content_size: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_name_components: 32,
            max_component_size: 255,
            max_content_size: 65536,
        }
    }
}

impl Name {
    pub fn validate(&self, config: &ValidationConfig) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.len() > config.max_name_components {
            return Err(ValidationError::NameTooDeep {
                depth: self.len(),
                max: config.max_name_components,
            });
        }
        if let Some(component) = self
            .components
            .iter()
            .find(|c| c.len() > config.max_component_size)
        {
            return Err(ValidationError::ComponentTooLarge {
                size: component.len(),
                max: config.max_component_size,
            });
        }
        Ok(())
    }
}

impl Interest {
    pub fn validate(&self, config: &ValidationConfig) -> Result<(), ValidationError> {
        self.name.validate(config)?;
        if self.lifetime == Some(Duration::ZERO) {
            return Err(ValidationError::ZeroLifetime);
        }
        Ok(())
    }
}

impl Data {
    pub fn validate(&self, config: &ValidationConfig) -> Result<(), ValidationError> {
        self.name.validate(config)?;
        if self.content.len() > config.max_content_size {
            return Err(ValidationError::ContentTooLarge {
                size: self.content.len(),
                max: config.max_content_size,
            });
        }
        Ok(())
    }
}

impl Nack {
    pub fn validate(&self, config: &ValidationConfig) -> Result<(), ValidationError> {
        self.interest.name.validate(config)
    }
}

impl PushPacket {
    pub fn validate(&self, config: &ValidationConfig) -> Result<(), ValidationError> {
        self.name.validate(config)?;
        if self.payload.len() > config.max_content_size {
            return Err(ValidationError::ContentTooLarge {
                size: self.payload.len(),
                max: config.max_content_size,
            });
        }
        Ok(())
    }
}

impl Packet {
    pub fn validate(&self, config: &ValidationConfig) -> Result<(), ValidationError> {
        match self {
            Packet::Interest(interest) => interest.validate(config),
            Packet::Data(data) => data.validate(config),
            Packet::Nack(nack) => nack.validate(config),
            Packet::Push(packet) => packet.validate(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        let config = ValidationConfig::default();

        assert_eq!(Name::new().validate(&config), Err(ValidationError::EmptyName));
        assert!(Name::from_str("/ok/name").validate(&config).is_ok());

        let deep = Name::from_components((0..40).map(|i| i.to_string().into_bytes()));
        assert_eq!(
            deep.validate(&config),
            Err(ValidationError::NameTooDeep { depth: 40, max: 32 })
        );

        let wide = Name::from_components(vec![vec![b'x'; 300]]);
        assert!(matches!(
            wide.validate(&config),
            Err(ValidationError::ComponentTooLarge { size: 300, .. })
        ));
    }

    #[test]
    fn test_interest_validation() {
        let config = ValidationConfig::default();
        let interest = Interest::new(Name::from_str("/a")).with_lifetime(Duration::ZERO);
        assert_eq!(interest.validate(&config), Err(ValidationError::ZeroLifetime));

        let packet: Packet = Interest::new(Name::from_str("/a")).into();
        assert!(packet.validate(&config).is_ok());
    }
}
