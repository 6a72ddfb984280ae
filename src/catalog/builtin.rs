//! Built-in detection rules.
//!
//! Each table row is `(id, name, type, pattern, severity, extra, tags)` where
//! `extra` is the fix text for vulnerabilities and the bypass technique id
//! for protections.

use crate::model::{Category, Severity};

use super::PatternSpec;

type Row = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    Severity,
    &'static str,
    &'static [&'static str],
);

const VULNERABILITIES: &[Row] = &[
    (
        "DEBUG_ENABLED",
        "Debug Enabled",
        "debug_configuration",
        r#"android:debuggable\s*=\s*"true""#,
        Severity::High,
        "Remove android:debuggable from release builds",
        &["debug", "manifest"],
    ),
    (
        "BACKUP_ALLOWED",
        "Backup Allowed",
        "data_backup",
        r#"android:allowBackup\s*=\s*"true""#,
        Severity::Medium,
        "Set android:allowBackup=\"false\" or define backup rules that exclude sensitive data",
        &["manifest", "storage"],
    ),
    (
        "CLEARTEXT_TRAFFIC",
        "Cleartext Traffic Permitted",
        "network_cleartext",
        r#"android:usesCleartextTraffic\s*=\s*"true""#,
        Severity::High,
        "Disable cleartext traffic and serve every endpoint over HTTPS",
        &["manifest", "network"],
    ),
    (
        "EXPORTED_COMPONENT",
        "Exported Component",
        "intent_exposure",
        r#"android:exported\s*=\s*"true""#,
        Severity::Medium,
        "Guard exported components with a signature-level permission",
        &["manifest", "intent"],
    ),
    (
        "HARDCODED_CREDENTIAL",
        "Hardcoded Credential",
        "hardcoded_credential",
        r#"(password|passwd|secret|token|api[_-]?key|client[_-]?secret)["']?\s*[:=]\s*["'][^"'\s]{8,}["']"#,
        Severity::Critical,
        "Move secrets out of the package and fetch them from a backend at runtime",
        &["credential"],
    ),
    (
        "SMALI_CONST_SECRET",
        "Secret in String Constant",
        "hardcoded_credential",
        r#"const-string(/jumbo)?\s+[vp]\d+,\s*"[^"]*(password|secret|api_key|access_token)[^"]*""#,
        Severity::High,
        "Do not embed secrets as string constants",
        &["credential"],
    ),
    (
        "INSECURE_STORAGE",
        "Insecure Data Storage",
        "insecure_storage",
        r"MODE_WORLD_(READABLE|WRITEABLE)|openFileOutput|getExternalStorageDirectory",
        Severity::Medium,
        "Store sensitive data with EncryptedSharedPreferences or the Android Keystore",
        &["storage"],
    ),
    (
        "WEAK_CRYPTO",
        "Weak Cryptography",
        "weak_crypto",
        r#"Cipher\.getInstance\(\s*"[^"]*(DES|RC4|ECB)[^"]*"|MessageDigest\.getInstance\(\s*"(MD5|SHA-?1)"|const-string(/jumbo)?\s+[vp]\d+,\s*"(DES|RC4|AES/ECB)[^"]*""#,
        Severity::High,
        "Use AES-GCM or ChaCha20-Poly1305 and SHA-256 or stronger",
        &["crypto"],
    ),
    (
        "INSECURE_HTTP",
        "Insecure HTTP Endpoint",
        "network_http",
        r#"http://[^\s"'<>)]+"#,
        Severity::Medium,
        "Use HTTPS for every remote endpoint",
        &["network"],
    ),
    (
        "INSECURE_FILE_PROTOCOL",
        "Insecure File Transfer Protocol",
        "network_protocol",
        r"\b(ftp|smb)://",
        Severity::Low,
        "Replace FTP and SMB transfers with an authenticated, encrypted transport",
        &["network"],
    ),
    (
        "PERMISSIVE_HOSTNAME_VERIFIER",
        "Permissive Hostname Verifier",
        "certificate_validation",
        r"ALLOW_ALL_HOSTNAME_VERIFIER|AllowAllHostnameVerifier|NoopHostnameVerifier",
        Severity::High,
        "Use the platform default hostname verifier",
        &["certificate_pinning"],
    ),
    (
        "WEBVIEW_JS_BRIDGE",
        "WebView JavaScript Bridge",
        "script_injection",
        r"addJavascriptInterface",
        Severity::Medium,
        "Restrict JavaScript interfaces to trusted content and annotate exposed methods",
        &["webview"],
    ),
    (
        "RAW_SQL_QUERY",
        "Raw SQL Query",
        "sql_injection",
        r"rawQuery\(|execSQL\(",
        Severity::Low,
        "Use parameterized queries",
        &["database"],
    ),
    (
        "CLIENT_SIDE_AUTH_CHECK",
        "Client-Side Authentication Check",
        "auth_logic",
        r"->(isLoggedIn|isAuthenticated|checkLogin)\(\)Z",
        Severity::Medium,
        "Validate sessions on the server, not through a local boolean",
        &["authentication"],
    ),
];

const PROTECTIONS: &[Row] = &[
    (
        "ROOT_DETECTION",
        "Root Detection",
        "root_detection",
        r"isRooted|checkRoot|RootTools|rootbeer|Superuser\.apk|SuperSU|/system/xbin/su",
        Severity::High,
        "hook_method_return_false",
        &["root_detection"],
    ),
    (
        "CERTIFICATE_PINNING",
        "Certificate Pinning",
        "certificate_pinning",
        r"CertificatePinner|checkServerTrusted|getTrustManagers|<pin-set|TrustKit",
        Severity::High,
        "trust_all_certificates",
        &["certificate_pinning"],
    ),
    (
        "ANTI_DEBUG",
        "Anti-Debugging",
        "anti_debugging",
        r"isDebuggerConnected|waitingForDebugger|TracerPid|jdwp",
        Severity::Medium,
        "hook_debug_check_false",
        &["debug"],
    ),
    (
        "SIGNATURE_CHECK",
        "Signature Verification",
        "signature_verification",
        r"GET_SIGNATURES|GET_SIGNING_CERTIFICATES|getSigningCertificateHistory|signatures\[0\]",
        Severity::Medium,
        "spoof_signature",
        &["integrity"],
    ),
    (
        "INTEGRITY_CHECK",
        "Integrity Attestation",
        "integrity_check",
        r"SafetyNet|IntegrityManager|PlayIntegrity|getInstallerPackageName|getInstallSourceInfo",
        Severity::High,
        "spoof_integrity_verdict",
        &["integrity"],
    ),
    (
        "EMULATOR_DETECTION",
        "Emulator Detection",
        "emulator_detection",
        r"goldfish|ranchu|generic_x86|Genymotion|ro\.kernel\.qemu|isEmulator",
        Severity::Medium,
        "spoof_device_properties",
        &["emulator_detection"],
    ),
    (
        "INSTRUMENTATION_DETECTION",
        "Instrumentation Detection",
        "hook_detection",
        r"de\.robv\.android\.xposed|XposedBridge|frida|libsubstrate",
        Severity::High,
        "hide_instrumentation",
        &["anti_tampering"],
    ),
    (
        "CODE_OBFUSCATION",
        "Code Obfuscation",
        "obfuscation",
        r"proguard|dexguard|allatori|obfuscat",
        Severity::Low,
        "deobfuscation",
        &["obfuscation"],
    ),
];

/// `(id, name, type, pattern, tags)`
const FEATURES: &[(&str, &str, &str, &str, &[&str])] = &[
    (
        "LOGIN_FLOW",
        "Login Flow",
        "authentication",
        r"login|sign_?in|authenticate|verifyCredentials",
        &["authentication"],
    ),
    (
        "BIOMETRIC_AUTH",
        "Biometric Authentication",
        "authentication",
        r"BiometricPrompt|FingerprintManager",
        &["authentication"],
    ),
    (
        "IN_APP_BILLING",
        "In-App Billing",
        "payment",
        r"com\.android\.vending\.billing|BillingClient|launchBillingFlow|verifyPurchase|purchaseToken",
        &["payment"],
    ),
    (
        "PREMIUM_GATE",
        "Premium Feature Gate",
        "license_check",
        r"isPremium|hasSubscription|isUnlocked",
        &["premium"],
    ),
    (
        "ANALYTICS_SDK",
        "Analytics SDK",
        "analytics",
        r"FirebaseAnalytics|com\.google\.android\.gms\.analytics|mixpanel|amplitude",
        &["analytics"],
    ),
    (
        "ADS_SDK",
        "Advertising SDK",
        "advertising",
        r"com\.google\.android\.gms\.ads|InterstitialAd|unityads|applovin",
        &["ads"],
    ),
    (
        "HTTP_CLIENT",
        "HTTP Client Library",
        "network",
        r"okhttp3|retrofit2|HttpURLConnection|com\.android\.volley",
        &["network"],
    ),
    (
        "WEBVIEW",
        "Embedded WebView",
        "webview",
        r"android\.webkit\.WebView|Landroid/webkit/WebView;",
        &["webview"],
    ),
    (
        "KEYSTORE_USAGE",
        "Keystore Usage",
        "crypto",
        r"AndroidKeyStore|javax\.crypto|Ljavax/crypto/",
        &["crypto"],
    ),
    (
        "PUSH_MESSAGING",
        "Push Messaging",
        "messaging",
        r"FirebaseMessagingService|com\.google\.firebase\.messaging",
        &["messaging"],
    ),
];

/// Weakness class for each built-in vulnerability.
const CWE_IDS: &[(&str, &str)] = &[
    ("DEBUG_ENABLED", "CWE-489"),
    ("BACKUP_ALLOWED", "CWE-530"),
    ("CLEARTEXT_TRAFFIC", "CWE-319"),
    ("EXPORTED_COMPONENT", "CWE-926"),
    ("HARDCODED_CREDENTIAL", "CWE-798"),
    ("SMALI_CONST_SECRET", "CWE-798"),
    ("INSECURE_STORAGE", "CWE-922"),
    ("WEAK_CRYPTO", "CWE-327"),
    ("INSECURE_HTTP", "CWE-319"),
    ("INSECURE_FILE_PROTOCOL", "CWE-73"),
    ("PERMISSIVE_HOSTNAME_VERIFIER", "CWE-297"),
    ("WEBVIEW_JS_BRIDGE", "CWE-749"),
    ("RAW_SQL_QUERY", "CWE-89"),
    ("CLIENT_SIDE_AUTH_CHECK", "CWE-602"),
];

fn cwe_for(id: &str) -> Option<String> {
    CWE_IDS
        .iter()
        .find(|(pattern, _)| *pattern == id)
        .map(|(_, cwe)| cwe.to_string())
}

/// Hosts that appear in nearly every package as XML namespaces or local test endpoints.
const HTTP_ALLOWLIST: &str =
    r"^http://(schemas\.android\.com|www\.w3\.org|ns\.adobe\.com|xml\.org|localhost|127\.0\.0\.1|10\.0\.2\.2)";

/// Built-in specs in load order: vulnerabilities, protections, features.
pub fn specs() -> Vec<PatternSpec> {
    let mut specs = Vec::with_capacity(VULNERABILITIES.len() + PROTECTIONS.len() + FEATURES.len());

    for (id, name, kind, pattern, severity, fix, tags) in VULNERABILITIES {
        let mut spec = row_spec(Category::Vulnerability, id, name, kind, pattern, tags);
        spec.severity = Some(*severity);
        spec.fix = Some(fix.to_string());
        spec.cwe = cwe_for(id);
        spec.description = format!("{} detected", name);
        if *id == "INSECURE_HTTP" {
            spec.exclude = Some(HTTP_ALLOWLIST.to_string());
        }
        if *id == "INSECURE_STORAGE" {
            spec.confidence = 0.7;
        }
        specs.push(spec);
    }

    for (id, name, kind, pattern, severity, technique, tags) in PROTECTIONS {
        let mut spec = row_spec(Category::Protection, id, name, kind, pattern, tags);
        spec.severity = Some(*severity);
        spec.bypass_technique = Some(technique.to_string());
        spec.description = format!("{} mechanism present", name);
        specs.push(spec);
    }

    for (id, name, kind, pattern, tags) in FEATURES {
        let mut spec = row_spec(Category::Feature, id, name, kind, pattern, tags);
        spec.description = format!("{} referenced", name);
        spec.confidence = 0.8;
        specs.push(spec);
    }

    specs
}

fn row_spec(
    category: Category,
    id: &str,
    name: &str,
    kind: &str,
    pattern: &str,
    tags: &[&str],
) -> PatternSpec {
    PatternSpec {
        id: id.to_string(),
        category,
        name: name.to_string(),
        description: String::new(),
        pattern_type: kind.to_string(),
        pattern: pattern.to_string(),
        exclude: None,
        severity: None,
        fix: None,
        cwe: None,
        bypass_technique: None,
        confidence: 0.9,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        enabled: true,
    }
}
