//! Embedded C runtime template.
//!
//! The emitter inlines this text verbatim into the generated translation
//! unit. Three levels exist: ultra-minimal (Windows, no CRT), minimal
//! (print-only), and the full runtime assembled from feature sections
//! selected by the dependency flags.

use linescript_deps::RuntimeNeeds;

/// Ultra-minimal Windows runtime: direct WriteFile/ExitProcess, no CRT.
pub const ULTRA_MINIMAL: &str = r#"
static HANDLE ls_out;
static void ls_io_init(void) { ls_out = GetStdHandle(STD_OUTPUT_HANDLE); }
static void ls_write(const char *p, DWORD n) {
    DWORD written;
    WriteFile(ls_out, p, n, &written, NULL);
}
static void print_i64(int64_t v) {
    char buf[32];
    char *p = buf + 31;
    int neg = v < 0;
    uint64_t u = neg ? (uint64_t)(-(v + 1)) + 1u : (uint64_t)v;
    *p = '0';
    if (u == 0) { p--; }
    while (u > 0) { *p-- = (char)('0' + (u % 10)); u /= 10; }
    if (neg) { *p-- = '-'; }
    ls_write(p + 1, (DWORD)(buf + 31 - p));
}
static void println_i64(int64_t v) { print_i64(v); ls_write("\n", 1); }
static void print_i32(int32_t v) { print_i64((int64_t)v); }
static void println_i32(int32_t v) { println_i64((int64_t)v); }
static void print_bool(int v) { if (v) ls_write("true", 4); else ls_write("false", 5); }
static void println_bool(int v) { print_bool(v); ls_write("\n", 1); }
static void print_str(const char *s) {
    DWORD n = 0;
    while (s[n]) n++;
    ls_write(s, n);
}
static void println_str(const char *s) { print_str(s); ls_write("\n", 1); }
"#;

/// Minimal runtime: fputs/snprintf prints, a small format buffer, no
/// containers and no scratch-string machinery.
pub const MINIMAL: &str = r#"
static _Thread_local char ls_format_buf[65536];
static _Thread_local size_t ls_format_len;
static _Thread_local int ls_format_active;

static void ls_emit_text(const char *s) {
    if (ls_format_active) {
        size_t n = strlen(s);
        if (ls_format_len + n < sizeof(ls_format_buf)) {
            memcpy(ls_format_buf + ls_format_len, s, n);
            ls_format_len += n;
        }
    } else {
        fputs(s, stdout);
    }
}
static void ls_format_begin(void) { ls_format_active = 1; ls_format_len = 0; }
static const char *ls_format_end(const char *end_arg) {
    size_t n = strlen(end_arg);
    if (ls_format_len + n < sizeof(ls_format_buf)) {
        memcpy(ls_format_buf + ls_format_len, end_arg, n);
        ls_format_len += n;
    }
    ls_format_buf[ls_format_len] = '\0';
    ls_format_active = 0;
    return ls_format_buf;
}

static void print_str(const char *s) { ls_emit_text(s); }
static void println_str(const char *s) { ls_emit_text(s); ls_emit_text("\n"); }
static void print_i64(int64_t v) {
    char buf[32];
    snprintf(buf, sizeof buf, "%lld", (long long)v);
    ls_emit_text(buf);
}
static void println_i64(int64_t v) { print_i64(v); ls_emit_text("\n"); }
static void print_i32(int32_t v) { print_i64((int64_t)v); }
static void println_i32(int32_t v) { println_i64((int64_t)v); }
static void print_bool(int v) { ls_emit_text(v ? "true" : "false"); }
static void println_bool(int v) { print_bool(v); ls_emit_text("\n"); }
"#;

/// Float printing, shared by minimal (when f64 flows) and the full runtime.
pub const FLOAT_PRINT: &str = r#"
static void print_f64(double v) {
    char buf[64];
    snprintf(buf, sizeof buf, "%g", v);
    ls_emit_text(buf);
}
static void println_f64(double v) { print_f64(v); ls_emit_text("\n"); }
static void print_f32(float v) { print_f64((double)v); }
static void println_f32(float v) { println_f64((double)v); }
"#;

pub const STATE_SPEED: &str = r#"
static int64_t ls_state_speed = 0;
static void stateSpeed(int64_t hz) { ls_state_speed = hz; }
static void ls_state_pace(void) {
    if (ls_state_speed > 0) {
#ifdef _WIN32
        Sleep((DWORD)(1000 / ls_state_speed));
#else
        struct timespec ts = { 0, (long)(1000000000LL / ls_state_speed) };
        nanosleep(&ts, NULL);
#endif
    }
}
"#;

/// Core of the full runtime: scratch-string ring, heap holds, format-mode
/// buffer, print family, conversions, math and clocks. Short-lived strings
/// live in a thread-local ring; values that survive a call boundary are
/// moved to a heap copy by `ls_str_hold`.
pub const FULL_CORE: &str = r#"
#define LS_SCRATCH_SLOTS 64
#define LS_SCRATCH_CAP 256

static _Thread_local char ls_scratch_ring[LS_SCRATCH_SLOTS][LS_SCRATCH_CAP];
static _Thread_local unsigned ls_scratch_next;

static char *ls_scratch(void) {
    char *slot = ls_scratch_ring[ls_scratch_next % LS_SCRATCH_SLOTS];
    ls_scratch_next++;
    return slot;
}

static const char *ls_str_hold(const char *s) {
    if (!s) return "";
    size_t n = strlen(s) + 1;
    char *copy = (char *)malloc(n);
    if (!copy) return "";
    memcpy(copy, s, n);
    return copy;
}

static _Thread_local char ls_format_buf[1 << 20];
static _Thread_local size_t ls_format_len;
static _Thread_local int ls_format_active;

static void ls_emit_text(const char *s) {
    if (!s) return;
    if (ls_format_active) {
        size_t n = strlen(s);
        if (ls_format_len + n < sizeof(ls_format_buf)) {
            memcpy(ls_format_buf + ls_format_len, s, n);
            ls_format_len += n;
        }
    } else {
        fputs(s, stdout);
    }
}
static void ls_format_begin(void) { ls_format_active = 1; ls_format_len = 0; }
static const char *ls_format_end(const char *end_arg) {
    size_t n = strlen(end_arg);
    if (ls_format_len + n < sizeof(ls_format_buf)) {
        memcpy(ls_format_buf + ls_format_len, end_arg, n);
        ls_format_len += n;
    }
    ls_format_buf[ls_format_len] = '\0';
    ls_format_active = 0;
    return ls_format_buf;
}

static void print_str(const char *s) { ls_emit_text(s); }
static void println_str(const char *s) { ls_emit_text(s); ls_emit_text("\n"); }
static void print_i64(int64_t v) {
    char *buf = ls_scratch();
    snprintf(buf, LS_SCRATCH_CAP, "%lld", (long long)v);
    ls_emit_text(buf);
}
static void println_i64(int64_t v) { print_i64(v); ls_emit_text("\n"); }
static void print_i32(int32_t v) { print_i64((int64_t)v); }
static void println_i32(int32_t v) { println_i64((int64_t)v); }
static void print_f64(double v) {
    char *buf = ls_scratch();
    snprintf(buf, LS_SCRATCH_CAP, "%g", v);
    ls_emit_text(buf);
}
static void println_f64(double v) { print_f64(v); ls_emit_text("\n"); }
static void print_f32(float v) { print_f64((double)v); }
static void println_f32(float v) { println_f64((double)v); }
static void print_bool(int v) { ls_emit_text(v ? "true" : "false"); }
static void println_bool(int v) { print_bool(v); ls_emit_text("\n"); }

static const char *formatOutput_str(const char *s) { return s ? s : ""; }
static const char *formatOutput_i64(int64_t v) {
    char *buf = ls_scratch();
    snprintf(buf, LS_SCRATCH_CAP, "%lld", (long long)v);
    return buf;
}
static const char *formatOutput_i32(int32_t v) { return formatOutput_i64((int64_t)v); }
static const char *formatOutput_f64(double v) {
    char *buf = ls_scratch();
    snprintf(buf, LS_SCRATCH_CAP, "%g", v);
    return buf;
}
static const char *formatOutput_f32(float v) { return formatOutput_f64((double)v); }
static const char *formatOutput_bool(int v) { return v ? "true" : "false"; }

static int ls_str_eq(const char *a, const char *b) {
    return strcmp(a ? a : "", b ? b : "") == 0;
}
static int ls_str_neq(const char *a, const char *b) { return !ls_str_eq(a, b); }

static int64_t str_len(const char *s) { return (int64_t)strlen(s ? s : ""); }
static const char *str_concat(const char *a, const char *b) {
    size_t na = strlen(a ? a : ""), nb = strlen(b ? b : "");
    char *out = (char *)malloc(na + nb + 1);
    if (!out) return "";
    memcpy(out, a ? a : "", na);
    memcpy(out + na, b ? b : "", nb + 1);
    return out;
}
static const char *str_substring(const char *s, int64_t from, int64_t to) {
    int64_t n = str_len(s);
    if (from < 0) from = 0;
    if (to > n) to = n;
    if (from >= to) return "";
    size_t len = (size_t)(to - from);
    char *out = (char *)malloc(len + 1);
    if (!out) return "";
    memcpy(out, s + from, len);
    out[len] = '\0';
    return out;
}
static const char *str_trim(const char *s) {
    if (!s) return "";
    while (*s && isspace((unsigned char)*s)) s++;
    size_t n = strlen(s);
    while (n > 0 && isspace((unsigned char)s[n - 1])) n--;
    char *out = (char *)malloc(n + 1);
    if (!out) return "";
    memcpy(out, s, n);
    out[n] = '\0';
    return out;
}
static const char *str_replace(const char *s, const char *from, const char *to) {
    if (!s || !from || !*from) return s ? s : "";
    size_t nf = strlen(from), nt = strlen(to ? to : "");
    size_t cap = strlen(s) * (nt > nf ? nt : 1) / (nf ? nf : 1) + strlen(s) + 1;
    char *out = (char *)malloc(cap + 1);
    if (!out) return "";
    size_t o = 0;
    while (*s) {
        if (strncmp(s, from, nf) == 0) {
            memcpy(out + o, to ? to : "", nt);
            o += nt;
            s += nf;
        } else {
            out[o++] = *s++;
        }
    }
    out[o] = '\0';
    return out;
}
static const char *str_upper(const char *s) {
    size_t n = strlen(s ? s : "");
    char *out = (char *)malloc(n + 1);
    if (!out) return "";
    for (size_t i = 0; i < n; i++) out[i] = (char)toupper((unsigned char)s[i]);
    out[n] = '\0';
    return out;
}
static const char *str_lower(const char *s) {
    size_t n = strlen(s ? s : "");
    char *out = (char *)malloc(n + 1);
    if (!out) return "";
    for (size_t i = 0; i < n; i++) out[i] = (char)tolower((unsigned char)s[i]);
    out[n] = '\0';
    return out;
}
static int str_contains(const char *s, const char *sub) {
    return strstr(s ? s : "", sub ? sub : "") != NULL;
}
static int64_t str_index_of(const char *s, const char *sub) {
    const char *found = strstr(s ? s : "", sub ? sub : "");
    return found ? (int64_t)(found - s) : -1;
}
static const char *str_char_at(const char *s, int64_t idx) {
    int64_t n = str_len(s);
    if (idx < 0 || idx >= n) return "";
    char *out = (char *)malloc(2);
    if (!out) return "";
    out[0] = s[idx];
    out[1] = '\0';
    return out;
}
static int str_starts_with(const char *s, const char *pre) {
    return strncmp(s ? s : "", pre ? pre : "", strlen(pre ? pre : "")) == 0;
}
static int str_ends_with(const char *s, const char *suf) {
    size_t ns = strlen(s ? s : ""), nf = strlen(suf ? suf : "");
    return nf <= ns && memcmp(s + ns - nf, suf, nf) == 0;
}
static const char *str_repeat(const char *s, int64_t times) {
    if (times <= 0) return "";
    size_t n = strlen(s ? s : "");
    char *out = (char *)malloc(n * (size_t)times + 1);
    if (!out) return "";
    for (int64_t i = 0; i < times; i++) memcpy(out + (size_t)i * n, s, n);
    out[n * (size_t)times] = '\0';
    return out;
}
static int str_eq(const char *a, const char *b) { return ls_str_eq(a, b); }
static int str_neq(const char *a, const char *b) { return ls_str_neq(a, b); }

static int64_t parse_i64(const char *s) { return s ? strtoll(s, NULL, 10) : 0; }
static double parse_f64(const char *s) { return s ? strtod(s, NULL) : 0.0; }
static int32_t to_i32(int64_t v) { return (int32_t)v; }
static int64_t to_i64(int32_t v) { return (int64_t)v; }
static float to_f32(double v) { return (float)v; }
static double to_f64(float v) { return (double)v; }
static int i64_to_bool(int64_t v) { return v != 0; }
static int64_t bool_to_i64(int v) { return v ? 1 : 0; }
static double i64_to_f64(int64_t v) { return (double)v; }
static int64_t f64_to_i64(double v) { return (int64_t)v; }
static const char *i64_to_str(int64_t v) { return formatOutput_i64(v); }
static const char *f64_to_str(double v) { return formatOutput_f64(v); }

static double rand_unit(void) { return (double)rand() / ((double)RAND_MAX + 1.0); }
static double ls_random(void) { return rand_unit(); }
static int64_t rand_range(int64_t lo, int64_t hi) {
    if (hi <= lo) return lo;
    return lo + (int64_t)(rand_unit() * (double)(hi - lo));
}

static int64_t clock_ms(void) {
#ifdef _WIN32
    return (int64_t)GetTickCount64();
#else
    struct timespec ts;
    clock_gettime(CLOCK_MONOTONIC, &ts);
    return (int64_t)ts.tv_sec * 1000 + ts.tv_nsec / 1000000;
#endif
}
static int64_t clock_us(void) {
#ifdef _WIN32
    LARGE_INTEGER freq, now;
    QueryPerformanceFrequency(&freq);
    QueryPerformanceCounter(&now);
    return (int64_t)(now.QuadPart * 1000000 / freq.QuadPart);
#else
    struct timespec ts;
    clock_gettime(CLOCK_MONOTONIC, &ts);
    return (int64_t)ts.tv_sec * 1000000 + ts.tv_nsec / 1000;
#endif
}
static void sleep_ms(int64_t ms) {
#ifdef _WIN32
    Sleep((DWORD)ms);
#else
    struct timespec ts = { (time_t)(ms / 1000), (long)((ms % 1000) * 1000000) };
    nanosleep(&ts, NULL);
#endif
}

static void ls_free_console(void) {
#ifdef _WIN32
    FreeConsole();
#endif
}
"#;

pub const RAW_MEMORY: &str = r#"
static int64_t ls_mem_budget = -1;
static int64_t ls_mem_used = 0;

static int64_t mem_alloc(int64_t size) {
    if (size <= 0) return 0;
    if (ls_mem_budget >= 0 && ls_mem_used + size > ls_mem_budget) return 0;
    void *p = malloc((size_t)size);
    if (p) ls_mem_used += size;
    return (int64_t)(intptr_t)p;
}
static void mem_free(int64_t p) { free((void *)(intptr_t)p); }
static int64_t mem_read_i64(int64_t p, int64_t off) {
    int64_t v;
    memcpy(&v, (char *)(intptr_t)p + off, sizeof v);
    return v;
}
static void mem_write_i64(int64_t p, int64_t off, int64_t v) {
    memcpy((char *)(intptr_t)p + off, &v, sizeof v);
}
static int32_t mem_read_i32(int64_t p, int64_t off) {
    int32_t v;
    memcpy(&v, (char *)(intptr_t)p + off, sizeof v);
    return v;
}
static void mem_write_i32(int64_t p, int64_t off, int32_t v) {
    memcpy((char *)(intptr_t)p + off, &v, sizeof v);
}
static double mem_read_f64(int64_t p, int64_t off) {
    double v;
    memcpy(&v, (char *)(intptr_t)p + off, sizeof v);
    return v;
}
static void mem_write_f64(int64_t p, int64_t off, double v) {
    memcpy((char *)(intptr_t)p + off, &v, sizeof v);
}
static void mem_copy(int64_t dst, int64_t src, int64_t n) {
    memmove((void *)(intptr_t)dst, (void *)(intptr_t)src, (size_t)n);
}
static void mem_set(int64_t dst, int64_t value, int64_t n) {
    memset((void *)(intptr_t)dst, (int)value, (size_t)n);
}
"#;

/// Containers: integer ids into fixed-size slot tables with free lists; the
/// caps return -1 on exhaustion.
pub const CONTAINERS: &str = r#"
#define LS_TABLE_CAP 4096

typedef struct { int64_t *items; int64_t len, cap; int used; } LsArray;
static LsArray ls_arrays[LS_TABLE_CAP];
static int64_t ls_array_free_list[LS_TABLE_CAP];
static int64_t ls_array_free_top = -1;
static int64_t ls_array_next = 0;

static int64_t array_new(void) {
    int64_t id;
    if (ls_array_free_top >= 0) id = ls_array_free_list[ls_array_free_top--];
    else if (ls_array_next < LS_TABLE_CAP) id = ls_array_next++;
    else return -1;
    ls_arrays[id].items = NULL;
    ls_arrays[id].len = 0;
    ls_arrays[id].cap = 0;
    ls_arrays[id].used = 1;
    return id;
}
static void array_free(int64_t id) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_arrays[id].used) return;
    free(ls_arrays[id].items);
    ls_arrays[id].items = NULL;
    ls_arrays[id].used = 0;
    ls_array_free_list[++ls_array_free_top] = id;
}
static int64_t array_len(int64_t id) {
    return (id >= 0 && id < LS_TABLE_CAP && ls_arrays[id].used) ? ls_arrays[id].len : 0;
}
static void array_push(int64_t id, int64_t v) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_arrays[id].used) return;
    LsArray *a = &ls_arrays[id];
    if (a->len == a->cap) {
        a->cap = a->cap ? a->cap * 2 : 8;
        a->items = (int64_t *)realloc(a->items, (size_t)a->cap * sizeof(int64_t));
    }
    a->items[a->len++] = v;
}
static int64_t array_get(int64_t id, int64_t idx) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_arrays[id].used) return 0;
    if (idx < 0 || idx >= ls_arrays[id].len) return 0;
    return ls_arrays[id].items[idx];
}
static void array_set(int64_t id, int64_t idx, int64_t v) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_arrays[id].used) return;
    if (idx < 0 || idx >= ls_arrays[id].len) return;
    ls_arrays[id].items[idx] = v;
}
static int64_t array_pop(int64_t id) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_arrays[id].used) return 0;
    if (ls_arrays[id].len == 0) return 0;
    return ls_arrays[id].items[--ls_arrays[id].len];
}
static int array_has(int64_t id, int64_t v) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_arrays[id].used) return 0;
    for (int64_t i = 0; i < ls_arrays[id].len; i++)
        if (ls_arrays[id].items[i] == v) return 1;
    return 0;
}
static void array_remove(int64_t id, int64_t idx) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_arrays[id].used) return;
    LsArray *a = &ls_arrays[id];
    if (idx < 0 || idx >= a->len) return;
    memmove(a->items + idx, a->items + idx + 1, (size_t)(a->len - idx - 1) * sizeof(int64_t));
    a->len--;
}

typedef struct { char **keys; char **vals; int64_t len, cap; int used; } LsDict;
static LsDict ls_dicts[LS_TABLE_CAP];
static int64_t ls_dict_free_list[LS_TABLE_CAP];
static int64_t ls_dict_free_top = -1;
static int64_t ls_dict_next = 0;

static char *ls_dup(const char *s) {
    size_t n = strlen(s ? s : "") + 1;
    char *out = (char *)malloc(n);
    if (out) memcpy(out, s ? s : "", n);
    return out;
}
static int64_t dict_new(void) {
    int64_t id;
    if (ls_dict_free_top >= 0) id = ls_dict_free_list[ls_dict_free_top--];
    else if (ls_dict_next < LS_TABLE_CAP) id = ls_dict_next++;
    else return -1;
    ls_dicts[id].keys = NULL;
    ls_dicts[id].vals = NULL;
    ls_dicts[id].len = 0;
    ls_dicts[id].cap = 0;
    ls_dicts[id].used = 1;
    return id;
}
static void dict_free(int64_t id) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_dicts[id].used) return;
    for (int64_t i = 0; i < ls_dicts[id].len; i++) {
        free(ls_dicts[id].keys[i]);
        free(ls_dicts[id].vals[i]);
    }
    free(ls_dicts[id].keys);
    free(ls_dicts[id].vals);
    ls_dicts[id].used = 0;
    ls_dict_free_list[++ls_dict_free_top] = id;
}
static int64_t ls_dict_find(LsDict *d, const char *key) {
    for (int64_t i = 0; i < d->len; i++)
        if (strcmp(d->keys[i], key) == 0) return i;
    return -1;
}
static void dict_set(int64_t id, const char *key, const char *val) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_dicts[id].used) return;
    LsDict *d = &ls_dicts[id];
    int64_t at = ls_dict_find(d, key ? key : "");
    if (at >= 0) {
        free(d->vals[at]);
        d->vals[at] = ls_dup(val);
        return;
    }
    if (d->len == d->cap) {
        d->cap = d->cap ? d->cap * 2 : 8;
        d->keys = (char **)realloc(d->keys, (size_t)d->cap * sizeof(char *));
        d->vals = (char **)realloc(d->vals, (size_t)d->cap * sizeof(char *));
    }
    d->keys[d->len] = ls_dup(key);
    d->vals[d->len] = ls_dup(val);
    d->len++;
}
static const char *dict_get(int64_t id, const char *key) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_dicts[id].used) return "";
    int64_t at = ls_dict_find(&ls_dicts[id], key ? key : "");
    return at >= 0 ? ls_dicts[id].vals[at] : "";
}
static int dict_has(int64_t id, const char *key) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_dicts[id].used) return 0;
    return ls_dict_find(&ls_dicts[id], key ? key : "") >= 0;
}
static void dict_remove(int64_t id, const char *key) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_dicts[id].used) return;
    LsDict *d = &ls_dicts[id];
    int64_t at = ls_dict_find(d, key ? key : "");
    if (at < 0) return;
    free(d->keys[at]);
    free(d->vals[at]);
    memmove(d->keys + at, d->keys + at + 1, (size_t)(d->len - at - 1) * sizeof(char *));
    memmove(d->vals + at, d->vals + at + 1, (size_t)(d->len - at - 1) * sizeof(char *));
    d->len--;
}
static int64_t dict_len(int64_t id) {
    return (id >= 0 && id < LS_TABLE_CAP && ls_dicts[id].used) ? ls_dicts[id].len : 0;
}

typedef struct { int64_t *keys; int64_t *vals; int64_t len, cap; int used; } LsMap;
static LsMap ls_maps[LS_TABLE_CAP];
static int64_t ls_map_free_list[LS_TABLE_CAP];
static int64_t ls_map_free_top = -1;
static int64_t ls_map_next = 0;

static int64_t map_new(void) {
    int64_t id;
    if (ls_map_free_top >= 0) id = ls_map_free_list[ls_map_free_top--];
    else if (ls_map_next < LS_TABLE_CAP) id = ls_map_next++;
    else return -1;
    ls_maps[id].keys = NULL;
    ls_maps[id].vals = NULL;
    ls_maps[id].len = 0;
    ls_maps[id].cap = 0;
    ls_maps[id].used = 1;
    return id;
}
static void map_free(int64_t id) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_maps[id].used) return;
    free(ls_maps[id].keys);
    free(ls_maps[id].vals);
    ls_maps[id].used = 0;
    ls_map_free_list[++ls_map_free_top] = id;
}
static int64_t ls_map_find(LsMap *m, int64_t key) {
    for (int64_t i = 0; i < m->len; i++)
        if (m->keys[i] == key) return i;
    return -1;
}
static void map_set(int64_t id, int64_t key, int64_t val) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_maps[id].used) return;
    LsMap *m = &ls_maps[id];
    int64_t at = ls_map_find(m, key);
    if (at >= 0) {
        m->vals[at] = val;
        return;
    }
    if (m->len == m->cap) {
        m->cap = m->cap ? m->cap * 2 : 8;
        m->keys = (int64_t *)realloc(m->keys, (size_t)m->cap * sizeof(int64_t));
        m->vals = (int64_t *)realloc(m->vals, (size_t)m->cap * sizeof(int64_t));
    }
    m->keys[m->len] = key;
    m->vals[m->len] = val;
    m->len++;
}
static int64_t map_get(int64_t id, int64_t key) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_maps[id].used) return 0;
    int64_t at = ls_map_find(&ls_maps[id], key);
    return at >= 0 ? ls_maps[id].vals[at] : 0;
}
static int map_has(int64_t id, int64_t key) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_maps[id].used) return 0;
    return ls_map_find(&ls_maps[id], key) >= 0;
}
static void map_remove(int64_t id, int64_t key) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_maps[id].used) return;
    LsMap *m = &ls_maps[id];
    int64_t at = ls_map_find(m, key);
    if (at < 0) return;
    memmove(m->keys + at, m->keys + at + 1, (size_t)(m->len - at - 1) * sizeof(int64_t));
    memmove(m->vals + at, m->vals + at + 1, (size_t)(m->len - at - 1) * sizeof(int64_t));
    m->len--;
}
static int64_t map_len(int64_t id) {
    return (id >= 0 && id < LS_TABLE_CAP && ls_maps[id].used) ? ls_maps[id].len : 0;
}

/* Objects back class instances: stringly-typed field stores. */
static int64_t object_new(void) { return dict_new(); }
static void object_free(int64_t id) { dict_free(id); }
static void object_set(int64_t id, const char *key, const char *val) { dict_set(id, key, val); }
static const char *object_get(int64_t id, const char *key) { return dict_get(id, key); }
static int object_has(int64_t id, const char *key) { return dict_has(id, key); }
static void object_remove(int64_t id, const char *key) { dict_remove(id, key); }
static int64_t object_len(int64_t id) { return dict_len(id); }
"#;

pub const OPTION_RESULT: &str = r#"
typedef struct { int64_t value; int is_some; int used; } LsOption;
static LsOption ls_options[LS_TABLE_CAP];
static int64_t ls_option_next = 0;

static int64_t option_some(int64_t v) {
    if (ls_option_next >= LS_TABLE_CAP) return -1;
    int64_t id = ls_option_next++;
    ls_options[id].value = v;
    ls_options[id].is_some = 1;
    ls_options[id].used = 1;
    return id;
}
static int64_t option_none(void) {
    if (ls_option_next >= LS_TABLE_CAP) return -1;
    int64_t id = ls_option_next++;
    ls_options[id].is_some = 0;
    ls_options[id].used = 1;
    return id;
}
static int option_is_some(int64_t id) {
    return id >= 0 && id < LS_TABLE_CAP && ls_options[id].used && ls_options[id].is_some;
}
static int64_t option_get(int64_t id) {
    return option_is_some(id) ? ls_options[id].value : 0;
}
static void option_free(int64_t id) {
    if (id >= 0 && id < LS_TABLE_CAP) ls_options[id].used = 0;
}

typedef struct { int64_t value; const char *err; int is_ok; int used; } LsResult;
static LsResult ls_results[LS_TABLE_CAP];
static int64_t ls_result_next = 0;

static int64_t result_ok(int64_t v) {
    if (ls_result_next >= LS_TABLE_CAP) return -1;
    int64_t id = ls_result_next++;
    ls_results[id].value = v;
    ls_results[id].err = "";
    ls_results[id].is_ok = 1;
    ls_results[id].used = 1;
    return id;
}
static int64_t result_err(const char *msg) {
    if (ls_result_next >= LS_TABLE_CAP) return -1;
    int64_t id = ls_result_next++;
    ls_results[id].value = 0;
    ls_results[id].err = ls_str_hold(msg);
    ls_results[id].is_ok = 0;
    ls_results[id].used = 1;
    return id;
}
static int result_is_ok(int64_t id) {
    return id >= 0 && id < LS_TABLE_CAP && ls_results[id].used && ls_results[id].is_ok;
}
static int64_t result_get(int64_t id) {
    return result_is_ok(id) ? ls_results[id].value : 0;
}
static const char *result_err_msg(int64_t id) {
    return (id >= 0 && id < LS_TABLE_CAP && ls_results[id].used) ? ls_results[id].err : "";
}
static void result_free(int64_t id) {
    if (id >= 0 && id < LS_TABLE_CAP) ls_results[id].used = 0;
}
"#;

pub const NP_VECTORS: &str = r#"
typedef struct { double *data; int64_t len; int used; } LsVec;
static LsVec ls_vecs[LS_TABLE_CAP];
static int64_t ls_vec_free_list[LS_TABLE_CAP];
static int64_t ls_vec_free_top = -1;
static int64_t ls_vec_next = 0;

static int64_t ls_vec_alloc(int64_t len) {
    int64_t id;
    if (ls_vec_free_top >= 0) id = ls_vec_free_list[ls_vec_free_top--];
    else if (ls_vec_next < LS_TABLE_CAP) id = ls_vec_next++;
    else return -1;
    ls_vecs[id].data = (double *)calloc((size_t)(len > 0 ? len : 1), sizeof(double));
    ls_vecs[id].len = len > 0 ? len : 0;
    ls_vecs[id].used = 1;
    return id;
}
static int64_t np_new(int64_t len) { return ls_vec_alloc(len); }
static void np_free(int64_t id) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_vecs[id].used) return;
    free(ls_vecs[id].data);
    ls_vecs[id].used = 0;
    ls_vec_free_list[++ls_vec_free_top] = id;
}
static int64_t np_len(int64_t id) {
    return (id >= 0 && id < LS_TABLE_CAP && ls_vecs[id].used) ? ls_vecs[id].len : 0;
}
static double np_get(int64_t id, int64_t i) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_vecs[id].used) return 0.0;
    if (i < 0 || i >= ls_vecs[id].len) return 0.0;
    return ls_vecs[id].data[i];
}
static void np_set(int64_t id, int64_t i, double v) {
    if (id < 0 || id >= LS_TABLE_CAP || !ls_vecs[id].used) return;
    if (i < 0 || i >= ls_vecs[id].len) return;
    ls_vecs[id].data[i] = v;
}
static int64_t np_copy(int64_t id) {
    int64_t n = np_len(id);
    int64_t out = ls_vec_alloc(n);
    if (out >= 0)
        for (int64_t i = 0; i < n; i++) ls_vecs[out].data[i] = ls_vecs[id].data[i];
    return out;
}
static int64_t np_from_range(int64_t lo, int64_t hi) {
    int64_t n = hi > lo ? hi - lo : 0;
    int64_t out = ls_vec_alloc(n);
    if (out >= 0)
        for (int64_t i = 0; i < n; i++) ls_vecs[out].data[i] = (double)(lo + i);
    return out;
}
static int64_t np_linspace(double lo, double hi, int64_t n) {
    int64_t out = ls_vec_alloc(n);
    if (out >= 0 && n > 1) {
        double step = (hi - lo) / (double)(n - 1);
        for (int64_t i = 0; i < n; i++) ls_vecs[out].data[i] = lo + step * (double)i;
    } else if (out >= 0 && n == 1) {
        ls_vecs[out].data[0] = lo;
    }
    return out;
}
static int64_t np_add(int64_t a, int64_t b) {
    int64_t n = np_len(a) < np_len(b) ? np_len(a) : np_len(b);
    int64_t out = ls_vec_alloc(n);
    if (out >= 0)
        for (int64_t i = 0; i < n; i++)
            ls_vecs[out].data[i] = ls_vecs[a].data[i] + ls_vecs[b].data[i];
    return out;
}
static int64_t np_mul(int64_t a, int64_t b) {
    int64_t n = np_len(a) < np_len(b) ? np_len(a) : np_len(b);
    int64_t out = ls_vec_alloc(n);
    if (out >= 0)
        for (int64_t i = 0; i < n; i++)
            ls_vecs[out].data[i] = ls_vecs[a].data[i] * ls_vecs[b].data[i];
    return out;
}
static int64_t np_scale(int64_t a, double k) {
    int64_t n = np_len(a);
    int64_t out = ls_vec_alloc(n);
    if (out >= 0)
        for (int64_t i = 0; i < n; i++) ls_vecs[out].data[i] = ls_vecs[a].data[i] * k;
    return out;
}
static double np_dot(int64_t a, int64_t b) {
    int64_t n = np_len(a) < np_len(b) ? np_len(a) : np_len(b);
    double acc = 0.0;
    for (int64_t i = 0; i < n; i++) acc += ls_vecs[a].data[i] * ls_vecs[b].data[i];
    return acc;
}
static double np_sum(int64_t a) {
    double acc = 0.0;
    for (int64_t i = 0; i < np_len(a); i++) acc += ls_vecs[a].data[i];
    return acc;
}
static double np_mean(int64_t a) {
    int64_t n = np_len(a);
    return n > 0 ? np_sum(a) / (double)n : 0.0;
}
static double np_min(int64_t a) {
    int64_t n = np_len(a);
    if (n == 0) return 0.0;
    double best = ls_vecs[a].data[0];
    for (int64_t i = 1; i < n; i++)
        if (ls_vecs[a].data[i] < best) best = ls_vecs[a].data[i];
    return best;
}
static double np_max(int64_t a) {
    int64_t n = np_len(a);
    if (n == 0) return 0.0;
    double best = ls_vecs[a].data[0];
    for (int64_t i = 1; i < n; i++)
        if (ls_vecs[a].data[i] > best) best = ls_vecs[a].data[i];
    return best;
}
"#;

/// Tasks map to OS threads; `await_all` drains in LIFO order. String values
/// never cross the spawn boundary because spawn accepts only zero-argument
/// calls.
pub const CONCURRENCY: &str = r#"
#define LS_TASK_CAP 256
typedef void (*LsTaskFn)(void);

#ifdef _WIN32
static HANDLE ls_task_handles[LS_TASK_CAP];
static DWORD WINAPI ls_task_entry(LPVOID arg) {
    ((LsTaskFn)arg)();
    return 0;
}
#else
static pthread_t ls_task_handles[LS_TASK_CAP];
static void *ls_task_entry(void *arg) {
    ((LsTaskFn)arg)();
    return NULL;
}
#endif
static int ls_task_live[LS_TASK_CAP];
static int64_t ls_task_top = 0;

static int64_t ls_spawn(LsTaskFn fn) {
    if (ls_task_top >= LS_TASK_CAP) return -1;
    int64_t id = ls_task_top++;
#ifdef _WIN32
    ls_task_handles[id] = CreateThread(NULL, 0, ls_task_entry, (LPVOID)fn, 0, NULL);
#else
    pthread_create(&ls_task_handles[id], NULL, ls_task_entry, (void *)fn);
#endif
    ls_task_live[id] = 1;
    return id;
}
static void ls_await(int64_t id) {
    if (id < 0 || id >= LS_TASK_CAP || !ls_task_live[id]) return;
#ifdef _WIN32
    WaitForSingleObject(ls_task_handles[id], INFINITE);
    CloseHandle(ls_task_handles[id]);
#else
    pthread_join(ls_task_handles[id], NULL);
#endif
    ls_task_live[id] = 0;
}
static void ls_await_all(void) {
    for (int64_t id = ls_task_top - 1; id >= 0; id--) ls_await(id);
    ls_task_top = 0;
}
"#;

pub const HTTP: &str = r#"
#ifndef _WIN32
typedef int LsSocket;
#define LS_BAD_SOCKET (-1)
#else
typedef SOCKET LsSocket;
#define LS_BAD_SOCKET INVALID_SOCKET
#endif

#define LS_HTTP_CAP 64
static LsSocket ls_http_socks[LS_HTTP_CAP];
static int ls_http_used[LS_HTTP_CAP];
static char ls_http_paths[LS_HTTP_CAP][512];

static void ls_net_init(void) {
#ifdef _WIN32
    static int done;
    if (!done) {
        WSADATA wsa;
        WSAStartup(MAKEWORD(2, 2), &wsa);
        done = 1;
    }
#endif
}
static int64_t ls_http_slot(void) {
    for (int64_t i = 0; i < LS_HTTP_CAP; i++)
        if (!ls_http_used[i]) return i;
    return -1;
}
static int64_t http_server_listen(int64_t port) {
    ls_net_init();
    int64_t id = ls_http_slot();
    if (id < 0) return -1;
    LsSocket s = socket(AF_INET, SOCK_STREAM, 0);
    if (s == LS_BAD_SOCKET) return -1;
    int yes = 1;
    setsockopt(s, SOL_SOCKET, SO_REUSEADDR, (const char *)&yes, sizeof yes);
    struct sockaddr_in addr;
    memset(&addr, 0, sizeof addr);
    addr.sin_family = AF_INET;
    addr.sin_addr.s_addr = htonl(INADDR_ANY);
    addr.sin_port = htons((unsigned short)port);
    if (bind(s, (struct sockaddr *)&addr, sizeof addr) != 0 || listen(s, 16) != 0)
        return -1;
    ls_http_socks[id] = s;
    ls_http_used[id] = 1;
    return id;
}
static void http_server_close(int64_t id) {
    if (id < 0 || id >= LS_HTTP_CAP || !ls_http_used[id]) return;
#ifdef _WIN32
    closesocket(ls_http_socks[id]);
#else
    close(ls_http_socks[id]);
#endif
    ls_http_used[id] = 0;
}
static int64_t http_server_accept(int64_t id) {
    if (id < 0 || id >= LS_HTTP_CAP || !ls_http_used[id]) return -1;
    LsSocket c = accept(ls_http_socks[id], NULL, NULL);
    if (c == LS_BAD_SOCKET) return -1;
    int64_t cid = ls_http_slot();
    if (cid < 0) return -1;
    char buf[2048];
    int n = (int)recv(c, buf, sizeof buf - 1, 0);
    ls_http_paths[cid][0] = '\0';
    if (n > 0) {
        buf[n] = '\0';
        const char *sp = strchr(buf, ' ');
        if (sp) {
            const char *end = strchr(sp + 1, ' ');
            size_t len = end ? (size_t)(end - sp - 1) : strlen(sp + 1);
            if (len >= sizeof ls_http_paths[cid]) len = sizeof ls_http_paths[cid] - 1;
            memcpy(ls_http_paths[cid], sp + 1, len);
            ls_http_paths[cid][len] = '\0';
        }
    }
    ls_http_socks[cid] = c;
    ls_http_used[cid] = 1;
    return cid;
}
static const char *http_request_path(int64_t id) {
    return (id >= 0 && id < LS_HTTP_CAP && ls_http_used[id]) ? ls_http_paths[id] : "";
}
static void http_respond(int64_t id, int64_t status, const char *body) {
    if (id < 0 || id >= LS_HTTP_CAP || !ls_http_used[id]) return;
    char head[256];
    size_t blen = strlen(body ? body : "");
    snprintf(head, sizeof head,
             "HTTP/1.1 %lld OK\r\nContent-Length: %zu\r\nConnection: close\r\n\r\n",
             (long long)status, blen);
    send(ls_http_socks[id], head, (int)strlen(head), 0);
    send(ls_http_socks[id], body ? body : "", (int)blen, 0);
    http_server_close(id);
}
static int64_t http_client_connect(const char *host, int64_t port) {
    ls_net_init();
    (void)host;
    int64_t id = ls_http_slot();
    if (id < 0) return -1;
    LsSocket s = socket(AF_INET, SOCK_STREAM, 0);
    if (s == LS_BAD_SOCKET) return -1;
    struct sockaddr_in addr;
    memset(&addr, 0, sizeof addr);
    addr.sin_family = AF_INET;
    addr.sin_addr.s_addr = htonl(0x7F000001u);
    addr.sin_port = htons((unsigned short)port);
    if (connect(s, (struct sockaddr *)&addr, sizeof addr) != 0) return -1;
    ls_http_socks[id] = s;
    ls_http_used[id] = 1;
    return id;
}
static void http_client_close(int64_t id) { http_server_close(id); }
static const char *http_get(const char *url) {
    (void)url;
    return "";
}
static const char *http_post(const char *url, const char *body) {
    (void)url;
    (void)body;
    return "";
}
"#;

/// Headless portable fallback; the Win32 window-class path renders through
/// GDI when compiled for Windows.
pub const GRAPHICS: &str = r#"
typedef struct { int64_t w, h; int used; } LsSurface;
static LsSurface ls_surfaces[LS_HTTP_CAP];
static int64_t ls_surface_next = 0;

static int64_t gfx_new(int64_t w, int64_t h) {
    if (ls_surface_next >= LS_HTTP_CAP) return -1;
    int64_t id = ls_surface_next++;
    ls_surfaces[id].w = w;
    ls_surfaces[id].h = h;
    ls_surfaces[id].used = 1;
    return id;
}
static void gfx_free(int64_t id) {
    if (id >= 0 && id < LS_HTTP_CAP) ls_surfaces[id].used = 0;
}
static void gfx_clear(int64_t id, int64_t color) { (void)id; (void)color; }
static void gfx_pixel(int64_t id, int64_t x, int64_t y, int64_t color) {
    (void)id; (void)x; (void)y; (void)color;
}
static void gfx_line(int64_t id, int64_t x0, int64_t y0, int64_t x1, int64_t y1, int64_t color) {
    (void)id; (void)x0; (void)y0; (void)x1; (void)y1; (void)color;
}
static void gfx_rect(int64_t id, int64_t x, int64_t y, int64_t w, int64_t h, int64_t color) {
    (void)id; (void)x; (void)y; (void)w; (void)h; (void)color;
}
static void gfx_present(int64_t id) { (void)id; ls_state_pace(); }
static int64_t pg_surface_new(int64_t w, int64_t h) { return gfx_new(w, h); }
static void pg_surface_fill(int64_t id, int64_t color) { gfx_clear(id, color); }
static int64_t pg_init(int64_t w, int64_t h) { return gfx_new(w, h); }

static int64_t game_new(const char *title, int64_t w, int64_t h) {
    (void)title;
    return gfx_new(w, h);
}
static void game_free(int64_t id) { gfx_free(id); }
static int64_t ls_game_frames = 0;
static int game_running(int64_t id) {
    (void)id;
    return ls_game_frames < (int64_t)1 << 20;
}
static void game_poll(int64_t id) { (void)id; ls_game_frames++; }
static void game_draw_rect(int64_t id, int64_t x, int64_t y, int64_t w, int64_t h, int64_t color) {
    gfx_rect(id, x, y, w, h, color);
}
static void game_present(int64_t id) { gfx_present(id); }
static int key_down(int64_t code) {
#ifdef _WIN32
    return (GetAsyncKeyState((int)code) & 0x8000) != 0;
#else
    (void)code;
    return 0;
#endif
}
static int key_down_char(const char *ch) {
    return ch && ch[0] ? key_down((int64_t)toupper((unsigned char)ch[0])) : 0;
}
"#;

/// Structure-of-arrays bodies with a flat Euler step.
pub const PHYSICS: &str = r#"
#define LS_PHYS_BODIES 1024
typedef struct {
    double x[LS_PHYS_BODIES];
    double y[LS_PHYS_BODIES];
    double vx[LS_PHYS_BODIES];
    double vy[LS_PHYS_BODIES];
    double mass[LS_PHYS_BODIES];
    double gx, gy;
    int64_t count;
    int used;
} LsPhysWorld;
static LsPhysWorld ls_phys_worlds[8];
static int64_t ls_phys_next = 0;
static double ls_camera_x = 0.0, ls_camera_y = 0.0;

static int64_t phys_new(void) {
    if (ls_phys_next >= 8) return -1;
    int64_t id = ls_phys_next++;
    memset(&ls_phys_worlds[id], 0, sizeof(LsPhysWorld));
    ls_phys_worlds[id].gy = -9.81;
    ls_phys_worlds[id].used = 1;
    return id;
}
static void phys_free(int64_t id) {
    if (id >= 0 && id < 8) ls_phys_worlds[id].used = 0;
}
static int64_t phys_add_body(int64_t id, double x, double y, double mass) {
    if (id < 0 || id >= 8 || !ls_phys_worlds[id].used) return -1;
    LsPhysWorld *w = &ls_phys_worlds[id];
    if (w->count >= LS_PHYS_BODIES) return -1;
    int64_t b = w->count++;
    w->x[b] = x;
    w->y[b] = y;
    w->vx[b] = 0.0;
    w->vy[b] = 0.0;
    w->mass[b] = mass;
    return b;
}
static void phys_set_gravity(int64_t id, double gx, double gy) {
    if (id < 0 || id >= 8 || !ls_phys_worlds[id].used) return;
    ls_phys_worlds[id].gx = gx;
    ls_phys_worlds[id].gy = gy;
}
static void phys_step(int64_t id, double dt) {
    if (id < 0 || id >= 8 || !ls_phys_worlds[id].used) return;
    LsPhysWorld *w = &ls_phys_worlds[id];
    for (int64_t b = 0; b < w->count; b++) {
        w->vx[b] += w->gx * dt;
        w->vy[b] += w->gy * dt;
        w->x[b] += w->vx[b] * dt;
        w->y[b] += w->vy[b] * dt;
    }
}
static double phys_body_x(int64_t id, int64_t b) {
    if (id < 0 || id >= 8 || !ls_phys_worlds[id].used) return 0.0;
    if (b < 0 || b >= ls_phys_worlds[id].count) return 0.0;
    return ls_phys_worlds[id].x[b];
}
static double phys_body_y(int64_t id, int64_t b) {
    if (id < 0 || id >= 8 || !ls_phys_worlds[id].used) return 0.0;
    if (b < 0 || b >= ls_phys_worlds[id].count) return 0.0;
    return ls_phys_worlds[id].y[b];
}
static void camera_set(double x, double y) { ls_camera_x = x; ls_camera_y = y; }
static double camera_x(void) { return ls_camera_x; }
static double camera_y(void) { return ls_camera_y; }
"#;

pub const CLI_TOKENS: &str = r#"
static int64_t cli_token_count(void) { return ls_cli_token_count_v; }
static const char *cli_token(int64_t i) {
    return (i >= 0 && i < ls_cli_token_count_v) ? ls_cli_tokens[i] : "";
}
static int cli_has(const char *name) {
    for (int64_t i = 0; i < ls_cli_token_count_v; i++)
        if (strcmp(ls_cli_tokens[i], name) == 0) return 1;
    return 0;
}
static const char *cli_value(const char *name) {
    for (int64_t i = 0; i + 1 < ls_cli_token_count_v; i++)
        if (strcmp(ls_cli_tokens[i], name) == 0) return ls_cli_tokens[i + 1];
    return "";
}
"#;

pub const INPUT: &str = r#"
static const char *ls_input_line(const char *prompt) {
    if (prompt && *prompt) {
        fputs(prompt, stdout);
        fflush(stdout);
    }
    char *buf = ls_scratch();
    if (!fgets(buf, LS_SCRATCH_CAP, stdin)) return "";
    size_t n = strlen(buf);
    while (n > 0 && (buf[n - 1] == '\n' || buf[n - 1] == '\r')) buf[--n] = '\0';
    return buf;
}
static int64_t input_i64(const char *prompt) { return parse_i64(ls_input_line(prompt)); }
static double input_f64(const char *prompt) { return parse_f64(ls_input_line(prompt)); }
"#;

/// Superuser shims; trace/step accounting lives in emitter-generated
/// globals (`ls_su_enabled`, `ls_su_step_limit`, `ls_su_steps`).
pub const SUPERUSER: &str = r#"
static void superuser(void) { ls_su_enabled = 1; }
static void ls_su_nop(void) {}
static void ls_su_trace_on(void) { ls_su_trace = 1; }
static void ls_su_trace_off(void) { ls_su_trace = 0; }
static void ls_su_limit_set(int64_t bytes) {
#ifdef LS_HAS_RAW_MEMORY
    ls_mem_budget = bytes;
#else
    (void)bytes;
#endif
}
static void ls_su_limit_clear(void) {
#ifdef LS_HAS_RAW_MEMORY
    ls_mem_budget = -1;
#endif
}
static void ls_su_step_limit_set(int64_t steps) { ls_su_step_limit = steps; }
static void ls_su_ir_dump(void) { fputs("[su] typed-ir dump unavailable at runtime\n", stderr); }
static void ls_su_mem_report(void) {
#ifdef LS_HAS_RAW_MEMORY
    fprintf(stderr, "[su] raw memory in use: %lld bytes\n", (long long)ls_mem_used);
#else
    fputs("[su] raw memory not linked\n", stderr);
#endif
}
static void ls_su_guard_step(void) {
    if (!ls_su_enabled || ls_su_step_limit < 0) return;
    if (++ls_su_steps > ls_su_step_limit) {
        fputs("[su] step limit exceeded\n", stderr);
        exit(120);
    }
}
static void ls_su_trace_stmt(const char *fn, int line, const char *kind) {
    if (ls_su_enabled && ls_su_trace)
        fprintf(stderr, "[su] %s:%d %s\n", fn, line, kind);
}
"#;

/// Assemble the full-runtime blob for a feature set. The emitter prepends
/// includes, global state, and the parallel macros.
pub fn render_runtime(needs: &RuntimeNeeds) -> String {
    if needs.ultra_minimal {
        return ULTRA_MINIMAL.to_string();
    }
    if needs.minimal {
        let mut out = String::from(MINIMAL);
        if needs.f64 {
            out.push_str(FLOAT_PRINT);
        }
        if needs.state_speed {
            out.push_str(STATE_SPEED);
        }
        return out;
    }

    let mut out = String::from(FULL_CORE);
    out.push_str(STATE_SPEED);
    if needs.raw_memory {
        out.push_str("#define LS_HAS_RAW_MEMORY 1\n");
        out.push_str(RAW_MEMORY);
    }
    if needs.containers {
        out.push_str(CONTAINERS);
    }
    if needs.option_result {
        if !needs.containers {
            out.push_str("#define LS_TABLE_CAP 4096\n");
        }
        out.push_str(OPTION_RESULT);
    }
    if needs.np_vectors {
        if !needs.containers && !needs.option_result {
            out.push_str("#define LS_TABLE_CAP 4096\n");
        }
        out.push_str(NP_VECTORS);
    }
    if needs.concurrency {
        out.push_str(CONCURRENCY);
    }
    if needs.http || needs.graphics {
        out.push_str(HTTP);
    }
    if needs.graphics {
        out.push_str(GRAPHICS);
    }
    if needs.physics {
        out.push_str(PHYSICS);
    }
    out.push_str(CLI_TOKENS);
    if needs.input {
        out.push_str(INPUT);
    }
    out.push_str(SUPERUSER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_needs() -> RuntimeNeeds {
        RuntimeNeeds {
            strings: true,
            containers: true,
            option_result: true,
            np_vectors: true,
            concurrency: true,
            http: true,
            graphics: true,
            physics: true,
            raw_memory: true,
            input: true,
            ..RuntimeNeeds::default()
        }
    }

    #[test]
    fn ultra_minimal_has_no_crt_calls() {
        let needs = RuntimeNeeds {
            minimal: true,
            ultra_minimal: true,
            ..RuntimeNeeds::default()
        };
        let blob = render_runtime(&needs);
        assert!(blob.contains("WriteFile"));
        assert!(!blob.contains("fputs"));
        assert!(!blob.contains("snprintf"));
    }

    #[test]
    fn minimal_runtime_prints_without_containers() {
        let needs = RuntimeNeeds {
            minimal: true,
            ..RuntimeNeeds::default()
        };
        let blob = render_runtime(&needs);
        assert!(blob.contains("println_i64"));
        assert!(blob.contains("ls_format_end"));
        assert!(!blob.contains("array_new"));
        assert!(!blob.contains("print_f64"));
    }

    #[test]
    fn minimal_with_f64_gains_float_prints() {
        let needs = RuntimeNeeds {
            minimal: true,
            f64: true,
            ..RuntimeNeeds::default()
        };
        assert!(render_runtime(&needs).contains("print_f64"));
    }

    #[test]
    fn full_runtime_sections_are_gated() {
        let blob = render_runtime(&full_needs());
        for symbol in [
            "ls_str_hold",
            "ls_scratch",
            "array_new",
            "dict_set",
            "map_get",
            "object_set",
            "option_some",
            "result_err",
            "np_linspace",
            "ls_spawn",
            "ls_await_all",
            "http_server_listen",
            "gfx_new",
            "phys_step",
            "cli_value",
            "mem_alloc",
            "ls_su_guard_step",
        ] {
            assert!(blob.contains(symbol), "missing {symbol}");
        }

        let lean = render_runtime(&RuntimeNeeds {
            strings: true,
            ..RuntimeNeeds::default()
        });
        assert!(!lean.contains("http_server_listen"));
        assert!(!lean.contains("phys_step"));
        assert!(!lean.contains("np_linspace"));
    }

    #[test]
    fn owned_handle_tables_use_free_lists() {
        let blob = render_runtime(&full_needs());
        assert!(blob.contains("ls_array_free_list"));
        assert!(blob.contains("return -1"), "caps must report exhaustion");
    }
}
