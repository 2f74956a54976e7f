/*!
 # Device classification

 Tags an advertised name with the vendor family it belongs to. Families are
 checked in declaration order and the first match wins. Some vendors are
 recognised by a name prefix, others by a substring anywhere in the name.

 Classification is advisory: a matching name does not prove the device speaks
 the protocol.
*/

use std::fmt;

/// How a family pattern is matched against a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePattern {
    /// Name starts with one of the prefixes
    Prefix(&'static [&'static str]),
    /// Name contains the text anywhere
    Contains(&'static str),
}

impl NamePattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Prefix(prefixes) => prefixes.iter().any(|p| name.starts_with(p)),
            NamePattern::Contains(needle) => name.contains(needle),
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Prefix(prefixes) => {
                let alternatives: Vec<String> = prefixes.iter().map(|p| format!("^{p}")).collect();
                f.write_str(&alternatives.join("|"))
            }
            NamePattern::Contains(needle) => f.write_str(needle),
        }
    }
}

/// Supported controller families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// APM series (APM-xxx)
    Apm,
    /// Triones series (Triones-xxx, Triones+xxx)
    Triones,
    /// Consmart series
    Consmart,
    /// Dream/Flash series
    Dream,
    /// QHM series
    Qhm,
    /// Name matched no pattern, or no name was advertised
    Unknown,
}

impl DeviceFamily {
    /// Known families in matching order
    pub const ALL: [DeviceFamily; 5] = [
        DeviceFamily::Apm,
        DeviceFamily::Triones,
        DeviceFamily::Consmart,
        DeviceFamily::Dream,
        DeviceFamily::Qhm,
    ];

    /// The name pattern for a known family
    pub fn pattern(&self) -> Option<NamePattern> {
        let pattern = match self {
            DeviceFamily::Apm => NamePattern::Prefix(&["APM-", "AP"]),
            DeviceFamily::Triones => NamePattern::Prefix(&["Triones-", "Triones+", "Triones"]),
            DeviceFamily::Consmart => NamePattern::Contains("Consmart"),
            DeviceFamily::Dream => NamePattern::Prefix(&["Dream", "Flash"]),
            DeviceFamily::Qhm => NamePattern::Prefix(&["QHM"]),
            DeviceFamily::Unknown => return None,
        };
        Some(pattern)
    }

    /// Get the family name as string
    pub fn name(&self) -> &'static str {
        match self {
            DeviceFamily::Apm => "APM",
            DeviceFamily::Triones => "TRIONES",
            DeviceFamily::Consmart => "CONSMART",
            DeviceFamily::Dream => "DREAM",
            DeviceFamily::Qhm => "QHM",
            DeviceFamily::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != DeviceFamily::Unknown
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classifies an advertised name; absent or empty names are unknown
pub fn classify(name: Option<&str>) -> DeviceFamily {
    let Some(name) = name.filter(|name| !name.is_empty()) else {
        return DeviceFamily::Unknown;
    };

    DeviceFamily::ALL
        .into_iter()
        .find(|family| family.pattern().is_some_and(|pattern| pattern.matches(name)))
        .unwrap_or(DeviceFamily::Unknown)
}
