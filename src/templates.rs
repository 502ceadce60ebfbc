/// JSON Schema profile every Data Package descriptor is checked against.
pub const DATA_PACKAGE_PROFILE_JSON: &str = include_str!("../templates/data_package_profile.json");
