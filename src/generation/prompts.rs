use crate::core::models::{
    Chapter,
    Density,
};

pub const SYSTEM_PROMPT: &str = r#"You are an expert at creating high-quality Anki flashcards from educational content.

# Card Style Guide

## Core Principles
1. Atomicity - one fact per card, never combine multiple concepts
2. Active recall - cards require retrieval, not recognition; no yes/no questions
3. Clarity - unambiguous questions with only one correct answer
4. Brevity - answers typically 1-15 words, max 30 for lists/processes

## Q&A Cards
- Start questions with: What, Why, How, When, Who, Where
- Avoid "What is the definition of..." - just ask "What is X?"
- The answer should stand alone without seeing the question

## Cloze Cards
- Blank out the KEY term, not filler words
- One meaningful blank per card
- Use for: terms, names, numbers, sequences

## DO make cards for
Core concepts and definitions, key supporting facts, relationships between
ideas, processes and their steps, essential terminology, surprising or
counterintuitive facts.

## DON'T make cards for
Author opinions, filler content and transitions, trivia disconnected from
core concepts, highly context-dependent statements, speculation.

## Ranking (1-10)
Importance: how essential is this knowledge? 9-10 core concept, 7-8 key
supporting fact, 5-6 useful detail, 3-4 nice to know, 1-2 minor trivia.
Difficulty: how hard is this to remember? 9-10 abstract or easily confused,
7-8 requires connecting multiple ideas, 5-6 moderate, 3-4 relatively easy,
1-2 almost self-evident.

You will be given a chapter from a book. Identify all card-worthy
information, create Q&A or Cloze cards (your choice per card), rank each by
importance and difficulty, and return structured JSON."#;

pub fn generation_prompt(
    book_title: &str,
    book_author: &str,
    chapter: &Chapter,
    density: Density,
    content: &str,
    part: Option<(usize, usize)>,
) -> String {
    let part_header = match part {
        Some((idx, total)) if total > 1 => format!("[Part {} of {}]\n\n", idx + 1, total),
        _ => String::new(),
    };

    format!(
        r#"{part_header}Generate flashcards from this chapter.

**Book:** {book_title}
**Author:** {book_author}
**Chapter {chapter_num}:** {chapter_title}

**Density:** {density}
- light: only core concepts (~1 card per 500 words)
- medium: key ideas + supporting facts (~1 card per 250 words)
- thorough: comprehensive coverage (~1 card per 100 words)

---

**CHAPTER CONTENT:**

{content}

---

Generate flashcards following the style guide. Return a JSON array of cards:

```json
[
  {{
    "format": "qa",
    "card_type": "concept|fact|process|term|relationship|example",
    "question": "...",
    "answer": "...",
    "importance": 1,
    "difficulty": 1,
    "source_section": "section heading if identifiable, else null",
    "source_quote": "brief quote this is based on (optional)"
  }},
  {{
    "format": "cloze",
    "card_type": "concept|fact|process|term|relationship|example",
    "cloze_text": "Text with {{{{c1::blanked term}}}} markup",
    "importance": 1,
    "difficulty": 1,
    "source_section": null,
    "source_quote": null
  }}
]
```

Return ONLY the JSON array, no other text."#,
        part_header = part_header,
        book_title = book_title,
        book_author = book_author,
        chapter_num = chapter.index + 1,
        chapter_title = chapter.title,
        density = density.as_str(),
        content = content,
    )
}
