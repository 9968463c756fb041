//! Manifest and matrix fixtures.

/// A device manifest serving `android.hardware.foo@<version>::<interface>/default` over hwbinder.
pub fn device_manifest(interface: &str, version: &str, override_: bool) -> String {
    format!(
        r#"type = "device"

[[hal]]
name = "android.hardware.foo"
transport = "hwbinder"
override = {override_}
fqnames = ["@{version}::{interface}/default"]
"#
    )
}

/// A framework matrix at `level` requiring `android.hardware.foo@<range>::IFoo/default`.
pub fn framework_matrix(level: u32, range: &str) -> String {
    format!(
        r#"type = "framework"
level = {level}

[[hal]]
name = "android.hardware.foo"
versions = ["{range}"]

[[hal.interface]]
name = "IFoo"
instances = ["default"]
"#
    )
}

pub const DEPRECATION_MATRIX_1: &str = r#"
type = "framework"
level = 1

[[hal]]
name = "android.hardware.major"
versions = ["1.0"]
optional = true

[[hal.interface]]
name = "IMajor"
instances = ["default"]

[[hal]]
name = "android.hardware.removed"
versions = ["1.0"]
optional = true

[[hal.interface]]
name = "IRemoved"
instances = ["default"]

[[hal]]
name = "android.hardware.minor"
versions = ["1.0"]
optional = true

[[hal.interface]]
name = "IMinor"
instances = ["default", "legacy"]
"#;

pub const DEPRECATION_MATRIX_2: &str = r#"
type = "framework"
level = 2

[[hal]]
name = "android.hardware.major"
versions = ["2.0"]
optional = true

[[hal.interface]]
name = "IMajor"
instances = ["default"]

[[hal]]
name = "android.hardware.minor"
versions = ["1.1"]
optional = true

[[hal.interface]]
name = "IMinor"
instances = ["default"]
"#;
