/*!
 * Synonym catalogs for domain-term expansion
 *
 * Each catalog maps a canonical term to its aliases (brand/generic drug
 * names, specialty variants, state abbreviations, condition synonyms, payer
 * families, hospital and system short names). Catalogs are built once and
 * shared by reference; nothing mutates them after construction.
 */

use std::collections::HashMap;

/// How an alias is compared against a record value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasMatch {
    /// Alias may appear anywhere inside the value
    Substring,
    /// Alias must equal the whole (trimmed, lower-cased) value
    Exact,
}

/// One canonical term and its aliases, all lower-cased
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub canonical: String,
    pub aliases: Vec<String>,
}

impl CatalogEntry {
    /// Canonical term followed by every alias
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Immutable canonical-term -> alias-list mapping
#[derive(Debug, Clone)]
pub struct SynonymCatalog {
    name: &'static str,
    alias_match: AliasMatch,
    entries: Vec<CatalogEntry>,
    // lower-cased canonical or alias -> entry indices
    lookup: HashMap<String, Vec<usize>>,
}

impl SynonymCatalog {
    /// Create an empty catalog
    pub fn new(name: &'static str, alias_match: AliasMatch) -> Self {
        Self {
            name,
            alias_match,
            entries: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Add a canonical term with its aliases
    pub fn with_entry(mut self, canonical: &str, aliases: &[&str]) -> Self {
        let entry = CatalogEntry {
            canonical: normalize_term(canonical),
            aliases: aliases.iter().map(|a| normalize_term(a)).collect(),
        };
        let idx = self.entries.len();
        for term in entry.terms() {
            let slot = self.lookup.entry(term.to_string()).or_default();
            if !slot.contains(&idx) {
                slot.push(idx);
            }
        }
        self.entries.push(entry);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Entries whose canonical term or one of whose aliases equals `term`
    pub fn entries_for(&self, term: &str) -> Vec<&CatalogEntry> {
        self.lookup
            .get(&normalize_term(term))
            .map(|indices| indices.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// Canonical term for `term`, if the catalog knows it
    pub fn canonical(&self, term: &str) -> Option<&str> {
        self.entries_for(term).first().map(|e| e.canonical.as_str())
    }

    /// The term itself plus every canonical/alias reachable from it, lower-cased and deduplicated
    pub fn expand(&self, term: &str) -> Vec<String> {
        let normalized = normalize_term(term);
        let mut expanded = vec![normalized.clone()];
        for entry in self.entries_for(&normalized) {
            for t in entry.terms() {
                if !expanded.iter().any(|e| e == t) {
                    expanded.push(t.to_string());
                }
            }
        }
        expanded
    }

    /// Expand a list of terms into one deduplicated list
    pub fn expand_all<S: AsRef<str>>(&self, terms: &[S]) -> Vec<String> {
        let mut expanded: Vec<String> = Vec::new();
        for term in terms {
            for t in self.expand(term.as_ref()) {
                if !expanded.contains(&t) {
                    expanded.push(t);
                }
            }
        }
        expanded
    }

    /// Fuzzy match a requested term against one record value.
    ///
    /// Case-insensitive and trimmed. Matches on equality, on either string
    /// containing the other, or when an alias of the term's catalog entry
    /// matches the value. For [`AliasMatch::Exact`] catalogs (state codes)
    /// every comparison is whole-value equality.
    pub fn fuzzy_match(&self, term: &str, value: &str) -> bool {
        let term = normalize_term(term);
        let value = normalize_term(value);
        if term.is_empty() || value.is_empty() {
            return false;
        }

        match self.alias_match {
            AliasMatch::Exact => {
                term == value
                    || self.entries_for(&term).iter().any(|e| e.terms().any(|a| a == value))
            }
            AliasMatch::Substring => {
                term == value
                    || value.contains(&term)
                    || term.contains(&value)
                    || self.entries_for(&term).iter().any(|e| e.terms().any(|a| value.contains(a)))
            }
        }
    }

    /// True when any expansion of `term` appears inside `haystack` (already lower-cased)
    pub fn expanded_contains(&self, term: &str, haystack: &str) -> bool {
        self.expand(term).iter().any(|t| !t.is_empty() && haystack.contains(t.as_str()))
    }
}

fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

/// The full set of catalogs consulted by the filter engines
#[derive(Debug, Clone)]
pub struct Catalogs {
    pub drugs: SynonymCatalog,
    pub drug_classes: SynonymCatalog,
    pub specialties: SynonymCatalog,
    pub states: SynonymCatalog,
    pub conditions: SynonymCatalog,
    pub payers: SynonymCatalog,
    pub hospitals: SynonymCatalog,
}

impl Default for Catalogs {
    fn default() -> Self {
        Self::standard()
    }
}

impl Catalogs {
    /// Built-in catalogs covering the common targeting vocabulary
    pub fn standard() -> Self {
        Self {
            drugs: standard_drugs(),
            drug_classes: standard_drug_classes(),
            specialties: standard_specialties(),
            // Whole-value matching only: substring matching would let "VA" hit "NV"
            // and partial names such as "californ" find nothing.
            states: standard_states(),
            conditions: standard_conditions(),
            payers: standard_payers(),
            hospitals: standard_hospitals(),
        }
    }

    /// Expand drug class/group names into member drug names, then into
    /// each member's brand/generic aliases.
    pub fn expand_drug_classes<S: AsRef<str>>(&self, classes: &[S]) -> Vec<String> {
        let members = self.drug_classes.expand_all(classes);
        self.drugs.expand_all(&members)
    }

    /// Two-letter code for a state name or code, if known
    pub fn state_code(&self, value: &str) -> Option<String> {
        let normalized = normalize_term(value);
        self.states.entries_for(&normalized).first().map(|entry| {
            entry.aliases.iter()
                .find(|a| a.len() == 2)
                .cloned()
                .unwrap_or_else(|| entry.canonical.clone())
                .to_uppercase()
        })
    }
}

fn standard_drugs() -> SynonymCatalog {
    SynonymCatalog::new("drugs", AliasMatch::Substring)
        .with_entry("tirzepatide", &["mounjaro", "zepbound"])
        .with_entry("semaglutide", &["ozempic", "wegovy", "rybelsus"])
        .with_entry("dulaglutide", &["trulicity"])
        .with_entry("liraglutide", &["victoza", "saxenda"])
        .with_entry("exenatide", &["byetta", "bydureon"])
        .with_entry("adalimumab", &["humira", "amjevita", "hadlima", "hyrimoz", "cyltezo", "yusimry"])
        .with_entry("etanercept", &["enbrel"])
        .with_entry("infliximab", &["remicade", "inflectra", "renflexis", "avsola"])
        .with_entry("certolizumab", &["cimzia"])
        .with_entry("golimumab", &["simponi"])
        .with_entry("ustekinumab", &["stelara"])
        .with_entry("secukinumab", &["cosentyx"])
        .with_entry("dupilumab", &["dupixent"])
        .with_entry("metformin", &["glucophage", "glumetza", "fortamet", "riomet"])
        .with_entry("empagliflozin", &["jardiance"])
        .with_entry("dapagliflozin", &["farxiga"])
        .with_entry("canagliflozin", &["invokana"])
        .with_entry("insulin glargine", &["lantus", "basaglar", "toujeo", "semglee"])
        .with_entry("insulin lispro", &["humalog", "admelog", "lyumjev"])
        .with_entry("atorvastatin", &["lipitor"])
        .with_entry("rosuvastatin", &["crestor"])
        .with_entry("simvastatin", &["zocor"])
        .with_entry("apixaban", &["eliquis"])
        .with_entry("rivaroxaban", &["xarelto"])
        .with_entry("dabigatran", &["pradaxa"])
        .with_entry("warfarin", &["coumadin", "jantoven"])
        .with_entry("pembrolizumab", &["keytruda"])
        .with_entry("nivolumab", &["opdivo"])
        .with_entry("erenumab", &["aimovig"])
        .with_entry("fremanezumab", &["ajovy"])
        .with_entry("galcanezumab", &["emgality"])
        .with_entry("rimegepant", &["nurtec"])
        .with_entry("ubrogepant", &["ubrelvy"])
        .with_entry("ocrelizumab", &["ocrevus"])
        .with_entry("natalizumab", &["tysabri"])
        .with_entry("levetiracetam", &["keppra"])
        .with_entry("lamotrigine", &["lamictal"])
        .with_entry("sumatriptan", &["imitrex"])
}

fn standard_drug_classes() -> SynonymCatalog {
    SynonymCatalog::new("drug_classes", AliasMatch::Substring)
        .with_entry("glp-1 agonists", &[
            "glp-1", "glp1", "glp-1 agonist", "glp-1 receptor agonist", "incretin",
            "tirzepatide", "semaglutide", "dulaglutide", "liraglutide", "exenatide",
        ])
        .with_entry("sglt2 inhibitors", &[
            "sglt2", "sglt-2", "sglt2 inhibitor", "gliflozin",
            "empagliflozin", "dapagliflozin", "canagliflozin",
        ])
        .with_entry("tnf inhibitors", &[
            "tnf", "anti-tnf", "tnf blocker", "tnf inhibitor",
            "adalimumab", "etanercept", "infliximab", "certolizumab", "golimumab",
        ])
        .with_entry("interleukin inhibitors", &[
            "il inhibitor", "il-17", "il-23", "il-4",
            "ustekinumab", "secukinumab", "dupilumab",
        ])
        .with_entry("statins", &[
            "statin", "hmg-coa reductase inhibitor",
            "atorvastatin", "rosuvastatin", "simvastatin",
        ])
        .with_entry("anticoagulants", &[
            "anticoagulant", "blood thinner", "doac",
            "apixaban", "rivaroxaban", "dabigatran", "warfarin",
        ])
        .with_entry("insulins", &["insulin", "insulin glargine", "insulin lispro"])
        .with_entry("biguanides", &["biguanide", "metformin"])
        .with_entry("cgrp antagonists", &[
            "cgrp", "cgrp inhibitor", "migraine preventive",
            "erenumab", "fremanezumab", "galcanezumab", "rimegepant", "ubrogepant",
        ])
        .with_entry("pd-1 inhibitors", &[
            "pd-1", "checkpoint inhibitor", "immunotherapy",
            "pembrolizumab", "nivolumab",
        ])
        .with_entry("ms disease modifying therapies", &[
            "dmt", "multiple sclerosis therapy", "ocrelizumab", "natalizumab",
        ])
        .with_entry("antiepileptics", &[
            "antiepileptic", "anticonvulsant", "aed", "levetiracetam", "lamotrigine",
        ])
        .with_entry("biologics", &[
            "biologic", "adalimumab", "etanercept", "infliximab", "ustekinumab",
            "secukinumab", "dupilumab", "ocrelizumab", "natalizumab",
        ])
}

fn standard_specialties() -> SynonymCatalog {
    SynonymCatalog::new("specialties", AliasMatch::Substring)
        .with_entry("neurology", &["neurologist", "neurologic", "neurological medicine"])
        .with_entry("neurological surgery", &["neurosurgeon", "neurosurgery", "spine surgery"])
        .with_entry("cardiology", &["cardiologist", "cardiovascular disease", "cardiovascular", "heart specialist"])
        .with_entry("oncology", &["oncologist", "hematology/oncology", "hematology & oncology", "medical oncology", "cancer specialist"])
        .with_entry("endocrinology", &["endocrinologist", "endocrinology, diabetes & metabolism", "diabetologist"])
        .with_entry("rheumatology", &["rheumatologist"])
        .with_entry("dermatology", &["dermatologist", "skin specialist"])
        .with_entry("gastroenterology", &["gastroenterologist", "digestive disease"])
        .with_entry("family medicine", &["family practice", "family physician", "general practice", "primary care"])
        .with_entry("internal medicine", &["internist", "general internal medicine", "primary care"])
        .with_entry("psychiatry", &["psychiatrist", "psychiatry & neurology"])
        .with_entry("pediatrics", &["pediatrician", "paediatrics"])
        .with_entry("orthopaedic surgery", &["orthopedic surgery", "orthopedist", "orthopedics", "orthopaedics"])
        .with_entry("nephrology", &["nephrologist", "kidney specialist"])
        .with_entry("pulmonary disease", &["pulmonology", "pulmonologist", "lung specialist"])
        .with_entry("obstetrics & gynecology", &["ob/gyn", "obgyn", "obstetrics", "gynecology", "gynecologist", "obstetrician"])
        .with_entry("urology", &["urologist"])
        .with_entry("ophthalmology", &["ophthalmologist", "eye specialist"])
        .with_entry("infectious disease", &["infectious diseases", "id specialist"])
        .with_entry("allergy & immunology", &["allergist", "immunologist", "allergy"])
}

fn standard_states() -> SynonymCatalog {
    const STATES: &[(&str, &str)] = &[
        ("alabama", "al"), ("alaska", "ak"), ("arizona", "az"), ("arkansas", "ar"),
        ("california", "ca"), ("colorado", "co"), ("connecticut", "ct"), ("delaware", "de"),
        ("district of columbia", "dc"), ("florida", "fl"), ("georgia", "ga"), ("hawaii", "hi"),
        ("idaho", "id"), ("illinois", "il"), ("indiana", "in"), ("iowa", "ia"),
        ("kansas", "ks"), ("kentucky", "ky"), ("louisiana", "la"), ("maine", "me"),
        ("maryland", "md"), ("massachusetts", "ma"), ("michigan", "mi"), ("minnesota", "mn"),
        ("mississippi", "ms"), ("missouri", "mo"), ("montana", "mt"), ("nebraska", "ne"),
        ("nevada", "nv"), ("new hampshire", "nh"), ("new jersey", "nj"), ("new mexico", "nm"),
        ("new york", "ny"), ("north carolina", "nc"), ("north dakota", "nd"), ("ohio", "oh"),
        ("oklahoma", "ok"), ("oregon", "or"), ("pennsylvania", "pa"), ("puerto rico", "pr"),
        ("rhode island", "ri"), ("south carolina", "sc"), ("south dakota", "sd"), ("tennessee", "tn"),
        ("texas", "tx"), ("utah", "ut"), ("vermont", "vt"), ("virginia", "va"),
        ("washington", "wa"), ("west virginia", "wv"), ("wisconsin", "wi"), ("wyoming", "wy"),
    ];

    let mut catalog = SynonymCatalog::new("states", AliasMatch::Exact);
    for &(name, code) in STATES {
        catalog = match code {
            "dc" => catalog.with_entry(name, &[code, "washington dc", "washington, d.c.", "d.c."]),
            "ny" => catalog.with_entry(name, &[code, "new york state"]),
            "ca" => catalog.with_entry(name, &[code, "calif"]),
            _ => catalog.with_entry(name, &[code]),
        };
    }
    catalog
}

fn standard_conditions() -> SynonymCatalog {
    SynonymCatalog::new("conditions", AliasMatch::Substring)
        .with_entry("diabetes", &["type 2 diabetes", "type 1 diabetes", "diabetes mellitus", "t2dm", "hyperglycemia"])
        .with_entry("obesity", &["overweight", "weight management", "weight loss", "morbid obesity"])
        .with_entry("multiple sclerosis", &["demyelinating disease", "relapsing ms"])
        .with_entry("migraine", &["migraines", "headache", "cephalalgia"])
        .with_entry("epilepsy", &["seizure", "seizures", "seizure disorder", "convulsions"])
        .with_entry("rheumatoid arthritis", &["rheumatoid", "inflammatory arthritis"])
        .with_entry("psoriasis", &["plaque psoriasis", "psoriatic arthritis"])
        .with_entry("crohn's disease", &["crohn", "crohns", "inflammatory bowel disease", "ibd"])
        .with_entry("ulcerative colitis", &["colitis", "inflammatory bowel disease"])
        .with_entry("heart failure", &["congestive heart failure", "chf", "cardiomyopathy"])
        .with_entry("hypertension", &["high blood pressure", "htn"])
        .with_entry("alzheimer's disease", &["alzheimer", "alzheimers", "dementia", "cognitive impairment"])
        .with_entry("parkinson's disease", &["parkinson", "parkinsons", "parkinsonism"])
        .with_entry("breast cancer", &["breast neoplasm", "breast carcinoma"])
        .with_entry("lung cancer", &["nsclc", "non-small cell lung cancer", "lung carcinoma"])
        .with_entry("depression", &["major depressive disorder", "mdd", "depressive disorder"])
        .with_entry("atopic dermatitis", &["eczema"])
        .with_entry("spinal stenosis", &["lumbar stenosis", "cervical stenosis"])
        .with_entry("atrial fibrillation", &["afib", "a-fib"])
}

fn standard_payers() -> SynonymCatalog {
    SynonymCatalog::new("payers", AliasMatch::Substring)
        .with_entry("medicare", &["medicare part d", "medicare advantage", "cms"])
        .with_entry("medicaid", &["medi-cal", "managed medicaid", "state medicaid", "chip"])
        .with_entry("commercial", &[
            "aetna", "cigna", "unitedhealthcare", "united healthcare", "blue cross",
            "blue shield", "bcbs", "anthem", "humana", "kaiser",
        ])
        .with_entry("pbm", &["express scripts", "caremark", "optumrx", "optum", "medimpact"])
        .with_entry("cash", &["self-pay", "self pay", "uninsured", "cash pay"])
        .with_entry("government", &["tricare", "veterans affairs", "champva", "medicare", "medicaid"])
}

fn standard_hospitals() -> SynonymCatalog {
    SynonymCatalog::new("hospitals", AliasMatch::Substring)
        .with_entry("mayo clinic", &["mayo"])
        .with_entry("cleveland clinic", &["cleveland clinic foundation"])
        .with_entry("johns hopkins", &["hopkins", "johns hopkins hospital", "johns hopkins medicine"])
        .with_entry("ucla health", &["ucla", "ronald reagan ucla medical center"])
        .with_entry("uc san diego health", &["ucsd", "uc san diego"])
        .with_entry("ucsf health", &["ucsf", "uc san francisco"])
        .with_entry("massachusetts general hospital", &["mass general", "massachusetts general", "mgh"])
        .with_entry("ohio state university", &["ohio state", "osu wexner", "wexner medical center"])
        .with_entry("kaiser permanente", &["kaiser"])
        .with_entry("nyu langone", &["nyu langone health", "nyu medical center"])
        .with_entry("mount sinai", &["mt sinai", "mount sinai hospital", "icahn"])
        .with_entry("cedars-sinai", &["cedars sinai", "cedars"])
        .with_entry("stanford health care", &["stanford", "stanford hospital"])
        .with_entry("md anderson", &["md anderson cancer center", "ut md anderson"])
        .with_entry("memorial sloan kettering", &["msk", "sloan kettering", "mskcc"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drug_alias_expansion_is_bidirectional() {
        let catalogs = Catalogs::standard();
        let from_brand = catalogs.drugs.expand("Mounjaro");
        assert!(from_brand.contains(&"tirzepatide".to_string()));
        let from_generic = catalogs.drugs.expand("tirzepatide");
        assert!(from_generic.contains(&"mounjaro".to_string()));
        assert_eq!(from_brand[0], "mounjaro");
    }

    #[test]
    fn test_unknown_term_expands_to_itself() {
        let catalogs = Catalogs::standard();
        assert_eq!(catalogs.drugs.expand("  Aspirin "), vec!["aspirin".to_string()]);
    }

    #[test]
    fn test_fuzzy_match_rules() {
        let specialties = Catalogs::standard().specialties;
        assert!(specialties.fuzzy_match("neurology", "NEUROLOGY"));
        assert!(specialties.fuzzy_match("neuro", "Neurology"));
        assert!(specialties.fuzzy_match("Neurology and Psychiatry", "neurology"));
        assert!(specialties.fuzzy_match("neurologist", "Neurology"));
        assert!(!specialties.fuzzy_match("cardiology", "Neurology"));
        assert!(!specialties.fuzzy_match("", "Neurology"));
    }

    #[test]
    fn test_state_matching_is_whole_value() {
        let catalogs = Catalogs::standard();
        assert!(catalogs.states.fuzzy_match("California", "CA"));
        assert!(catalogs.states.fuzzy_match("ca", "California"));
        assert!(catalogs.states.fuzzy_match("TX", "tx"));
        assert!(!catalogs.states.fuzzy_match("Virginia", "NV"));
        assert!(!catalogs.states.fuzzy_match("va", "Nevada"));
        assert_eq!(catalogs.state_code("texas").as_deref(), Some("TX"));
        assert_eq!(catalogs.state_code("wy").as_deref(), Some("WY"));
        assert_eq!(catalogs.state_code("atlantis"), None);
    }

    #[test]
    fn test_drug_class_expansion_reaches_brands() {
        let catalogs = Catalogs::standard();
        let expanded = catalogs.expand_drug_classes(&["GLP1"]);
        assert!(expanded.contains(&"semaglutide".to_string()));
        assert!(expanded.contains(&"ozempic".to_string()));
        assert!(expanded.contains(&"mounjaro".to_string()));
    }
}
