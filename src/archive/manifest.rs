//! Extracts package metadata from `AndroidManifest.xml` text.

use roxmltree::{Document, Node};

use crate::model::PackageInfo;

/// Look up an attribute by local name, with or without the `android:` namespace.
fn attr<'a>(node: &Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name() == name)
        .map(|a| a.value())
}

fn is_true(node: &Node<'_, '_>, name: &str) -> bool {
    attr(node, name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Parse `text` and fill the manifest-derived fields of `info`.
///
/// `info` is left untouched when the document is not well-formed XML.
pub fn apply(text: &str, info: &mut PackageInfo) -> Result<(), roxmltree::Error> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();

    info.package_name = attr(&root, "package").map(str::to_string);
    info.version_code = attr(&root, "versionCode").map(str::to_string);
    info.version_name = attr(&root, "versionName").map(str::to_string);

    for node in root.descendants().filter(Node::is_element) {
        let name = attr(&node, "name").map(str::to_string);

        match node.tag_name().name() {
            "uses-sdk" => {
                info.min_sdk = attr(&node, "minSdkVersion").and_then(|v| v.parse().ok());
                info.target_sdk = attr(&node, "targetSdkVersion").and_then(|v| v.parse().ok());
            }
            "uses-permission" | "uses-permission-sdk-23" => {
                if let Some(name) = name {
                    if !info.permissions.contains(&name) {
                        info.permissions.push(name);
                    }
                }
            }
            "application" => {
                info.flags.debuggable = is_true(&node, "debuggable");
                info.flags.allow_backup = is_true(&node, "allowBackup");
                info.flags.uses_cleartext_traffic = is_true(&node, "usesCleartextTraffic");
            }
            tag @ ("activity" | "activity-alias" | "service" | "receiver" | "provider") => {
                let Some(name) = name else { continue };
                if is_true(&node, "exported") {
                    info.flags.exported_components.push(name.clone());
                }
                match tag {
                    "service" => info.services.push(name),
                    "receiver" => info.receivers.push(name),
                    "provider" => info.providers.push(name),
                    _ => info.activities.push(name),
                }
            }
            _ => {}
        }
    }

    Ok(())
}
