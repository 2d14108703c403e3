// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain keyword families.
//!
//! Used by the keyword fallback extractor, the gate's priority score and
//! the category guess for explicit memories.

use crate::category::CoreCategory;
use crate::text::contains_word;

/// A named group of keywords that signal one kind of personal fact.
#[derive(Debug)]
pub struct DomainFamily {
    pub name: &'static str,
    pub category: CoreCategory,
    /// Importance given to a fallback memory from this family.
    pub importance: u8,
    pub keywords: &'static [&'static str],
}

pub static FAMILIES: &[DomainFamily] = &[
    DomainFamily {
        name: "work",
        category: CoreCategory::WorkContext,
        importance: 6,
        keywords: &[
            "work", "works", "working", "job", "office", "company", "employer", "manager",
            "colleague", "coworker", "boss", "career", "project", "deadline", "salary",
            "engineer", "developer", "meeting", "client", "startup", "promotion", "team",
            "工作", "公司", "同事", "项目", "老板",
        ],
    },
    DomainFamily {
        name: "device",
        category: CoreCategory::Device,
        importance: 4,
        keywords: &[
            "laptop", "phone", "iphone", "android", "macbook", "computer", "tablet", "ipad",
            "pc", "monitor", "keyboard", "headphones", "camera", "smartwatch", "router",
            "console", "手机", "电脑", "笔记本",
        ],
    },
    DomainFamily {
        name: "relationship",
        category: CoreCategory::Relationship,
        importance: 7,
        keywords: &[
            "wife", "husband", "partner", "girlfriend", "boyfriend", "mother", "father",
            "mom", "dad", "sister", "brother", "son", "daughter", "friend", "family",
            "married", "kids", "children", "parents", "dog", "cat", "pet",
            "妻子", "丈夫", "朋友", "家人", "孩子", "父母",
        ],
    },
    DomainFamily {
        name: "health",
        category: CoreCategory::Health,
        importance: 8,
        keywords: &[
            "allergy", "allergic", "diabetes", "asthma", "medication", "medicine", "doctor",
            "hospital", "surgery", "diet", "vegetarian", "vegan", "pregnant", "injury",
            "therapy", "sleep", "exercise", "gym", "blood pressure", "过敏", "医生", "医院",
            "健康",
        ],
    },
    DomainFamily {
        name: "location",
        category: CoreCategory::Location,
        importance: 7,
        keywords: &[
            "live", "lives", "living", "moved", "move", "hometown", "apartment", "house",
            "city", "country", "neighborhood", "address", "relocate", "relocated", "born in",
            "住在", "搬到", "家乡",
        ],
    },
    DomainFamily {
        name: "preference",
        category: CoreCategory::Preference,
        importance: 5,
        keywords: &[
            "love", "loves", "favorite", "favourite", "prefer", "prefers", "enjoy", "enjoys",
            "hate", "hates", "dislike", "dislikes", "fan of", "喜欢", "讨厌", "最爱",
        ],
    },
    DomainFamily {
        name: "personal_info",
        category: CoreCategory::PersonalInfo,
        importance: 7,
        keywords: &[
            "my name", "name is", "years old", "birthday", "born", "age", "nationality",
            "speak", "language", "我叫", "名字", "生日", "岁",
        ],
    },
    DomainFamily {
        name: "goal",
        category: CoreCategory::Goal,
        importance: 6,
        keywords: &[
            "goal", "goals", "plan to", "planning", "want to", "hope to", "dream", "aim",
            "learning", "saving for", "目标", "计划", "希望",
        ],
    },
    DomainFamily {
        name: "skill",
        category: CoreCategory::Skill,
        importance: 5,
        keywords: &[
            "skilled", "expert", "fluent", "certified", "degree", "studied", "play the",
            "programming", "rust", "python", "javascript", "guitar", "piano", "擅长", "会说",
        ],
    },
    DomainFamily {
        name: "event",
        category: CoreCategory::Event,
        importance: 6,
        keywords: &[
            "wedding", "graduation", "interview", "appointment", "trip", "vacation",
            "conference", "anniversary", "party", "flight", "婚礼", "旅行", "面试",
        ],
    },
];

/// A family that matched some text, with the keywords that hit.
#[derive(Debug)]
pub struct FamilyMatch {
    pub family: &'static DomainFamily,
    pub matched: Vec<&'static str>,
}

/// Families whose keywords appear in `text`, in declaration order.
pub fn match_families(text: &str) -> Vec<FamilyMatch> {
    let lower = text.to_lowercase();
    FAMILIES
        .iter()
        .filter_map(|family| {
            let matched: Vec<&'static str> = family
                .keywords
                .iter()
                .copied()
                .filter(|kw| contains_word(&lower, kw))
                .collect();
            if matched.is_empty() {
                None
            } else {
                Some(FamilyMatch { family, matched })
            }
        })
        .collect()
}

/// Total keyword hits across all families.
pub fn keyword_hit_count(text: &str) -> usize {
    match_families(text).iter().map(|m| m.matched.len()).sum()
}

/// The family with the most keyword hits, earliest family on ties.
pub fn best_family(text: &str) -> Option<&'static DomainFamily> {
    let mut best: Option<FamilyMatch> = None;
    for candidate in match_families(text) {
        let better = match &best {
            Some(current) => candidate.matched.len() > current.matched.len(),
            None => true,
        };
        if better {
            best = Some(candidate);
        }
    }
    best.map(|m| m.family)
}
