// Compliance control mapper (C2): a static lookup from CWE/OWASP ids to
// the controls of seven compliance frameworks, plus per-scan summaries and
// per-framework audit reports. Purely data-driven, immutable reference data
// consulted by the orchestrator's enrichment pass.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::models::Finding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Soc2,
    PciDss,
    Hipaa,
    Gdpr,
    Iso27001,
    NistCsf,
    CisControls,
}

impl Framework {
    pub fn tag(self) -> &'static str {
        match self {
            Framework::Soc2 => "soc2",
            Framework::PciDss => "pci_dss",
            Framework::Hipaa => "hipaa",
            Framework::Gdpr => "gdpr",
            Framework::Iso27001 => "iso_27001",
            Framework::NistCsf => "nist_csf",
            Framework::CisControls => "cis_controls",
        }
    }

    pub fn human_name(self) -> &'static str {
        match self {
            Framework::Soc2 => "SOC 2 Type II",
            Framework::PciDss => "PCI-DSS v4.0",
            Framework::Hipaa => "HIPAA Security Rule",
            Framework::Gdpr => "GDPR",
            Framework::Iso27001 => "ISO 27001:2022",
            Framework::NistCsf => "NIST Cybersecurity Framework",
            Framework::CisControls => "CIS Controls v8",
        }
    }

    pub fn all() -> [Framework; 7] {
        [
            Framework::Soc2,
            Framework::PciDss,
            Framework::Hipaa,
            Framework::Gdpr,
            Framework::Iso27001,
            Framework::NistCsf,
            Framework::CisControls,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceControl {
    pub framework: &'static str,
    pub control_id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub requirement_level: &'static str,
}

type FrameworkControls = &'static [(&'static str, &'static [&'static str])];

macro_rules! fw {
    ($($framework:literal => [$($control:literal),* $(,)?]),* $(,)?) => {
        &[$(($framework, &[$($control),*])),*]
    };
}

/// CWE id -> framework -> control ids. Covers the eleven CWEs the static
/// analyzer and engine adapters are known to emit.
static CWE_MAPPINGS: Lazy<HashMap<&'static str, FrameworkControls>> = Lazy::new(|| {
    HashMap::from([
        ("CWE-89", fw! {
            "soc2" => ["CC6.1", "CC6.6", "CC7.1", "CC7.2"],
            "pci_dss" => ["6.2.4", "6.3.1", "6.5.1"],
            "hipaa" => ["164.312(a)(1)", "164.312(a)(2)(iv)"],
            "gdpr" => ["Art. 32(1)(b)", "Art. 32(1)(d)"],
            "iso_27001" => ["A.14.2.5", "A.14.1.2"],
            "nist_csf" => ["PR.DS-2", "PR.DS-5"],
            "cis_controls" => ["16.1", "16.11"],
        }),
        ("CWE-79", fw! {
            "soc2" => ["CC6.1", "CC6.6", "CC7.1"],
            "pci_dss" => ["6.2.4", "6.5.7"],
            "hipaa" => ["164.312(a)(1)"],
            "gdpr" => ["Art. 32(1)(b)"],
            "iso_27001" => ["A.14.2.5"],
            "nist_csf" => ["PR.DS-5"],
            "cis_controls" => ["16.1"],
        }),
        ("CWE-287", fw! {
            "soc2" => ["CC6.1", "CC6.2", "CC6.3"],
            "pci_dss" => ["8.2.1", "8.3.1", "8.3.2", "8.6.1"],
            "hipaa" => ["164.312(d)", "164.312(a)(2)(i)"],
            "gdpr" => ["Art. 32(1)(b)", "Art. 32(1)(d)"],
            "iso_27001" => ["A.9.2.1", "A.9.4.2", "A.9.4.3"],
            "nist_csf" => ["PR.AC-1", "PR.AC-7"],
            "cis_controls" => ["5.1", "5.2", "6.3"],
        }),
        ("CWE-200", fw! {
            "soc2" => ["CC6.1", "CC6.7", "P4.1"],
            "pci_dss" => ["3.4.1", "4.2.1", "8.3.1"],
            "hipaa" => ["164.312(a)(2)(iv)", "164.312(e)(2)(ii)"],
            "gdpr" => ["Art. 32(1)(a)", "Art. 5(1)(f)"],
            "iso_27001" => ["A.8.2.3", "A.13.2.3"],
            "nist_csf" => ["PR.DS-1", "PR.DS-2"],
            "cis_controls" => ["3.10", "3.11"],
        }),
        ("CWE-639", fw! {
            "soc2" => ["CC6.1", "CC6.3", "CC6.6"],
            "pci_dss" => ["7.1.1", "7.2.1", "7.3.1"],
            "hipaa" => ["164.312(a)(1)", "164.312(a)(2)(i)"],
            "gdpr" => ["Art. 32(1)(b)", "Art. 25(2)"],
            "iso_27001" => ["A.9.1.1", "A.9.4.1"],
            "nist_csf" => ["PR.AC-4", "PR.PT-3"],
            "cis_controls" => ["6.1", "6.2"],
        }),
        ("CWE-918", fw! {
            "soc2" => ["CC6.1", "CC6.6", "CC7.2"],
            "pci_dss" => ["6.2.4", "6.5.8"],
            "hipaa" => ["164.312(a)(1)"],
            "gdpr" => ["Art. 32(1)(b)"],
            "iso_27001" => ["A.13.1.1", "A.14.1.2"],
            "nist_csf" => ["PR.DS-5", "DE.CM-1"],
            "cis_controls" => ["12.1", "13.1"],
        }),
        ("CWE-16", fw! {
            "soc2" => ["CC6.1", "CC6.6", "CC7.1"],
            "pci_dss" => ["2.2.1", "6.4.1", "6.4.2"],
            "hipaa" => ["164.312(a)(2)(iv)"],
            "gdpr" => ["Art. 32(1)(d)"],
            "iso_27001" => ["A.12.6.1", "A.14.2.8"],
            "nist_csf" => ["PR.IP-1", "PR.IP-2"],
            "cis_controls" => ["4.1", "4.2"],
        }),
        ("CWE-770", fw! {
            "soc2" => ["CC6.1", "CC6.6", "A1.2"],
            "pci_dss" => ["6.5.10", "11.4.1"],
            "hipaa" => ["164.312(a)(2)(i)"],
            "gdpr" => ["Art. 32(1)(b)"],
            "iso_27001" => ["A.12.1.3", "A.13.1.2"],
            "nist_csf" => ["PR.DS-4", "DE.CM-1"],
            "cis_controls" => ["9.2", "13.8"],
        }),
        ("CWE-327", fw! {
            "soc2" => ["CC6.1", "CC6.7"],
            "pci_dss" => ["3.6.1", "4.2.1", "4.2.2"],
            "hipaa" => ["164.312(a)(2)(iv)", "164.312(e)(2)(ii)"],
            "gdpr" => ["Art. 32(1)(a)"],
            "iso_27001" => ["A.10.1.1", "A.10.1.2"],
            "nist_csf" => ["PR.DS-1", "PR.DS-2"],
            "cis_controls" => ["3.10", "3.11"],
        }),
        ("CWE-22", fw! {
            "soc2" => ["CC6.1", "CC6.6"],
            "pci_dss" => ["6.2.4", "6.5.8"],
            "hipaa" => ["164.312(a)(1)"],
            "gdpr" => ["Art. 32(1)(b)"],
            "iso_27001" => ["A.14.2.5"],
            "nist_csf" => ["PR.DS-5"],
            "cis_controls" => ["16.1"],
        }),
        ("CWE-778", fw! {
            "soc2" => ["CC7.2", "CC7.3", "CC7.4"],
            "pci_dss" => ["10.2.1", "10.3.1", "10.4.1"],
            "hipaa" => ["164.312(b)"],
            "gdpr" => ["Art. 30", "Art. 33"],
            "iso_27001" => ["A.12.4.1", "A.12.4.2"],
            "nist_csf" => ["DE.AE-3", "DE.CM-1"],
            "cis_controls" => ["8.2", "8.5"],
        }),
    ])
});

/// OWASP API Top-10 id -> framework -> control ids. Only soc2/pci_dss/
/// hipaa/gdpr are populated here, matching the reference mapping.
static OWASP_MAPPINGS: Lazy<HashMap<&'static str, FrameworkControls>> = Lazy::new(|| {
    HashMap::from([
        ("API1:2023", fw! {
            "soc2" => ["CC6.1", "CC6.3"], "pci_dss" => ["7.1.1", "7.2.1"],
            "hipaa" => ["164.312(a)(1)"], "gdpr" => ["Art. 32(1)(b)"],
        }),
        ("API2:2023", fw! {
            "soc2" => ["CC6.1", "CC6.2", "CC6.3"], "pci_dss" => ["8.2.1", "8.3.1"],
            "hipaa" => ["164.312(d)"], "gdpr" => ["Art. 32(1)(b)"],
        }),
        ("API3:2023", fw! {
            "soc2" => ["CC6.1", "CC6.3"], "pci_dss" => ["7.1.1"],
            "hipaa" => ["164.312(a)(1)"], "gdpr" => ["Art. 25(2)"],
        }),
        ("API4:2023", fw! {
            "soc2" => ["CC6.1", "A1.2"], "pci_dss" => ["6.5.10"],
            "hipaa" => ["164.312(a)(2)(i)"], "gdpr" => ["Art. 32(1)(b)"],
        }),
        ("API5:2023", fw! {
            "soc2" => ["CC6.1", "CC6.3"], "pci_dss" => ["7.1.1", "7.2.1"],
            "hipaa" => ["164.312(a)(1)"], "gdpr" => ["Art. 32(1)(b)"],
        }),
        ("API6:2023", fw! {
            "soc2" => ["CC6.1", "CC6.6"], "pci_dss" => ["6.5.10"],
            "hipaa" => ["164.312(a)(1)"], "gdpr" => ["Art. 32(1)(b)"],
        }),
        ("API7:2023", fw! {
            "soc2" => ["CC6.1", "CC6.6"], "pci_dss" => ["6.5.8"],
            "hipaa" => ["164.312(a)(1)"], "gdpr" => ["Art. 32(1)(b)"],
        }),
        ("API8:2023", fw! {
            "soc2" => ["CC6.1", "CC6.6", "CC7.1"], "pci_dss" => ["2.2.1", "6.4.1"],
            "hipaa" => ["164.312(a)(2)(iv)"], "gdpr" => ["Art. 32(1)(d)"],
        }),
        ("API9:2023", fw! {
            "soc2" => ["CC6.1", "CC7.1"], "pci_dss" => ["2.4", "6.3.2"],
            "hipaa" => ["164.312(a)(1)"], "gdpr" => ["Art. 30"],
        }),
        ("API10:2023", fw! {
            "soc2" => ["CC6.1", "CC9.2"], "pci_dss" => ["6.4.3", "12.8.1"],
            "hipaa" => ["164.314(a)(2)(i)"], "gdpr" => ["Art. 28"],
        }),
    ])
});

macro_rules! control {
    ($framework:literal, $id:literal, $title:literal, $desc:literal, $category:literal, $level:literal) => {
        ($id, ComplianceControl {
            framework: $framework,
            control_id: $id,
            title: $title,
            description: $desc,
            category: $category,
            requirement_level: $level,
        })
    };
}

/// Static metadata for the control ids referenced above. Not exhaustive —
/// controls missing here degrade to id-only in audit reports.
static CONTROL_DETAILS: Lazy<HashMap<&'static str, HashMap<&'static str, ComplianceControl>>> = Lazy::new(|| {
    let soc2 = HashMap::from([
        control!("SOC 2", "CC6.1", "Logical and Physical Access Controls", "The entity implements logical access security software, infrastructure, and architectures over protected information assets to protect them from security events to meet the entity's objectives.", "Common Criteria", "required"),
        control!("SOC 2", "CC6.2", "Authentication Controls", "Prior to issuing system credentials and granting system access, the entity registers and authorizes new internal and external users.", "Common Criteria", "required"),
        control!("SOC 2", "CC6.3", "Authorization Controls", "The entity authorizes, modifies, or removes access to data, software, functions, and other protected information assets based on roles.", "Common Criteria", "required"),
        control!("SOC 2", "CC6.6", "Security Measures Against Threats", "The entity implements logical access security measures to protect against threats from sources outside its system boundaries.", "Common Criteria", "required"),
        control!("SOC 2", "CC6.7", "Data Transmission Security", "The entity restricts the transmission, movement, and removal of information to authorized internal and external users and processes.", "Common Criteria", "required"),
        control!("SOC 2", "CC7.1", "Vulnerability Detection", "To meet its objectives, the entity uses detection and monitoring procedures to identify changes to configurations that result in the introduction of new vulnerabilities.", "Common Criteria", "required"),
        control!("SOC 2", "CC7.2", "Security Event Monitoring", "The entity monitors system components and the operation of those components for anomalies that are indicative of malicious acts.", "Common Criteria", "required"),
    ]);
    let pci_dss = HashMap::from([
        control!("PCI-DSS v4.0", "6.2.4", "Secure Coding Techniques", "Software engineering techniques or other methods are defined and in use by software development personnel to prevent or mitigate common software attacks.", "Requirement 6", "required"),
        control!("PCI-DSS v4.0", "6.5.1", "Injection Flaws", "Injection flaws, particularly SQL injection, are addressed in development processes.", "Requirement 6", "required"),
        control!("PCI-DSS v4.0", "8.3.1", "Strong Authentication", "All user access to system components is authenticated via strong authentication.", "Requirement 8", "required"),
    ]);
    let hipaa = HashMap::from([
        control!("HIPAA", "164.312(a)(1)", "Access Control", "Implement technical policies and procedures for electronic information systems that maintain ePHI to allow access only to authorized persons or software programs.", "Technical Safeguards", "required"),
        control!("HIPAA", "164.312(d)", "Person or Entity Authentication", "Implement procedures to verify that a person or entity seeking access to ePHI is the one claimed.", "Technical Safeguards", "required"),
    ]);
    let gdpr = HashMap::from([
        control!("GDPR", "Art. 32(1)(b)", "Security of Processing", "The ability to ensure the ongoing confidentiality, integrity, availability and resilience of processing systems and services.", "Article 32", "required"),
        control!("GDPR", "Art. 32(1)(d)", "Security Testing", "A process for regularly testing, assessing and evaluating the effectiveness of technical and organizational measures.", "Article 32", "required"),
    ]);
    HashMap::from([
        ("soc2", soc2),
        ("pci_dss", pci_dss),
        ("hipaa", hipaa),
        ("gdpr", gdpr),
    ])
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkSummary {
    pub controls_affected: usize,
    pub controls: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub frameworks: HashMap<String, FrameworkSummary>,
    pub total_controls_affected: usize,
    pub controls_by_framework: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFindingRef {
    pub finding_id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub severity: String,
    pub endpoint: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditControlDetail {
    pub control_id: String,
    pub title: String,
    pub description: String,
    pub requirement_level: String,
    pub findings_count: usize,
    pub findings: Vec<AuditFindingRef>,
    pub status: String,
    pub remediation_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub framework: String,
    pub framework_name: String,
    pub generated_at: DateTime<Utc>,
    pub total_findings: usize,
    pub controls_affected: usize,
    pub control_details: Vec<AuditControlDetail>,
}

/// Static compliance mapper. Cheap to construct; holds no mutable state
/// beyond which frameworks are enabled for this instance.
pub struct ComplianceMapper {
    enabled_frameworks: Vec<Framework>,
}

impl Default for ComplianceMapper {
    fn default() -> Self {
        Self { enabled_frameworks: Framework::all().to_vec() }
    }
}

impl ComplianceMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frameworks(frameworks: Vec<Framework>) -> Self {
        Self { enabled_frameworks: frameworks }
    }

    fn is_enabled(&self, tag: &str) -> bool {
        self.enabled_frameworks.iter().any(|f| f.tag() == tag)
    }

    /// Union CWE-derived and OWASP-derived control sets for one finding,
    /// filtered to the enabled frameworks, deduplicated.
    pub fn map_finding(&self, finding: &Finding) -> HashMap<String, Vec<String>> {
        let mut mappings: HashMap<String, BTreeSet<String>> = HashMap::new();

        if let Some(cwe) = &finding.cwe_id {
            let cwe_clean = cwe.trim_start_matches("CWE-");
            let cwe_key = format!("CWE-{cwe_clean}");
            if let Some(table) = CWE_MAPPINGS.get(cwe_key.as_str()) {
                for (framework, controls) in table.iter() {
                    if self.is_enabled(framework) {
                        let entry = mappings.entry(framework.to_string()).or_default();
                        entry.extend(controls.iter().map(|c| c.to_string()));
                    }
                }
            }
        }

        if let Some(owasp) = &finding.owasp_category {
            let owasp_id = owasp.split(" - ").next().unwrap_or(owasp.as_str());
            if let Some(table) = OWASP_MAPPINGS.get(owasp_id) {
                for (framework, controls) in table.iter() {
                    if self.is_enabled(framework) {
                        let entry = mappings.entry(framework.to_string()).or_default();
                        entry.extend(controls.iter().map(|c| c.to_string()));
                    }
                }
            }
        }

        mappings.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()
    }

    pub fn get_control_details(&self, framework: &str, control_id: &str) -> Option<ComplianceControl> {
        CONTROL_DETAILS.get(framework)?.get(control_id).cloned()
    }

    pub fn get_summary(&self, findings: &[Finding]) -> ComplianceSummary {
        let mut all_controls: HashMap<String, BTreeSet<String>> = HashMap::new();

        for finding in findings {
            for (framework, controls) in self.map_finding(finding) {
                all_controls.entry(framework).or_default().extend(controls);
            }
        }

        let mut frameworks = HashMap::new();
        let mut controls_by_framework = HashMap::new();
        let mut total = 0usize;

        for (framework, controls) in &all_controls {
            let control_list: Vec<String> = controls.iter().cloned().collect();
            total += control_list.len();
            controls_by_framework.insert(framework.clone(), control_list.clone());
            frameworks.insert(
                framework.clone(),
                FrameworkSummary {
                    controls_affected: control_list.len(),
                    status: if control_list.is_empty() { "COMPLIANT".to_string() } else { "REQUIRES_ATTENTION".to_string() },
                    controls: control_list,
                },
            );
        }

        ComplianceSummary { frameworks, total_controls_affected: total, controls_by_framework }
    }

    pub fn generate_audit_report(&self, findings: &[Finding], framework: Framework) -> AuditReport {
        let framework_key = framework.tag();
        let mut affected: HashMap<String, Vec<AuditFindingRef>> = HashMap::new();

        for finding in findings {
            let mappings = self.map_finding(finding);
            if let Some(controls) = mappings.get(framework_key) {
                for control_id in controls {
                    affected.entry(control_id.clone()).or_default().push(AuditFindingRef {
                        finding_id: finding.id.clone(),
                        type_: finding.type_.clone(),
                        severity: finding.severity.as_str().to_string(),
                        endpoint: finding.endpoint.clone(),
                        description: finding.description.clone(),
                    });
                }
            }
        }

        let control_details = affected
            .into_iter()
            .map(|(control_id, finding_refs)| {
                let info = self.get_control_details(framework_key, &control_id);
                AuditControlDetail {
                    title: info.as_ref().map(|c| c.title.to_string()).unwrap_or_else(|| control_id.clone()),
                    description: info.as_ref().map(|c| c.description.to_string()).unwrap_or_default(),
                    requirement_level: info.map(|c| c.requirement_level.to_string()).unwrap_or_else(|| "required".to_string()),
                    findings_count: finding_refs.len(),
                    findings: finding_refs,
                    status: "NON_COMPLIANT".to_string(),
                    remediation_required: true,
                    control_id,
                }
            })
            .collect::<Vec<_>>();

        AuditReport {
            framework: framework_key.to_string(),
            framework_name: framework.human_name().to_string(),
            generated_at: Utc::now(),
            total_findings: findings.len(),
            controls_affected: control_details.len(),
            control_details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, EngineOrigin, Severity};
    use std::collections::HashMap as StdHashMap;

    fn bola_finding() -> Finding {
        Finding {
            id: "f1".to_string(),
            engine: EngineOrigin::Static,
            type_: "BOLA".to_string(),
            severity: Severity::High,
            confidence: Confidence::High,
            title: "BOLA".to_string(),
            description: String::new(),
            remediation: None,
            code_fix: None,
            evidence: None,
            request: None,
            response: None,
            endpoint: "/users/{userId}".to_string(),
            method: "GET".to_string(),
            parameter: None,
            cwe_id: Some("CWE-639".to_string()),
            cve_id: None,
            owasp_category: Some("API1:2023 - Broken Object Level Authorization".to_string()),
            cvss_score: None,
            references: Vec::new(),
            compliance_mappings: StdHashMap::new(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn bola_gate_maps_expected_controls() {
        let mapper = ComplianceMapper::new();
        let mapping = mapper.map_finding(&bola_finding());

        let mut soc2 = mapping.get("soc2").cloned().unwrap_or_default();
        soc2.sort();
        assert_eq!(soc2, vec!["CC6.1", "CC6.3", "CC6.6"]);

        assert!(mapping.get("pci_dss").unwrap().contains(&"7.1.1".to_string()));
    }

    #[test]
    fn map_finding_is_idempotent() {
        let mapper = ComplianceMapper::new();
        let finding = bola_finding();
        let first = mapper.map_finding(&finding);
        let second = mapper.map_finding(&finding);
        assert_eq!(first, second);
    }

    #[test]
    fn get_summary_marks_requires_attention() {
        let mapper = ComplianceMapper::new();
        let summary = mapper.get_summary(&[bola_finding()]);
        assert_eq!(summary.frameworks.get("soc2").unwrap().status, "REQUIRES_ATTENTION");
        assert!(summary.total_controls_affected > 0);
    }

    #[test]
    fn unknown_control_degrades_to_id_only() {
        let mapper = ComplianceMapper::new();
        assert!(mapper.get_control_details("soc2", "CC9.9").is_none());
    }

    #[test]
    fn disabled_framework_is_excluded() {
        let mapper = ComplianceMapper::with_frameworks(vec![Framework::Gdpr]);
        let mapping = mapper.map_finding(&bola_finding());
        assert!(!mapping.contains_key("soc2"));
        assert!(mapping.contains_key("gdpr"));
    }
}
